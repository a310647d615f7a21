use std::collections::{HashMap, VecDeque};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::engine::{Engine, EngineCallbacks, EngineFactory, Hint, ResultSink, WindowHandle};
use crate::protocol::CallResult;
use crate::registry::Token;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Destroy,
    Run,
    Terminate,
    Navigate(String),
    SetHtml(String),
    SetTitle(String),
    SetSize(i32, i32, Hint),
    Init(String),
    Eval(String),
    Dispatch(Token),
    Bind(String, Token),
    Unbind(String),
    Return(String, CallResult),
}

#[derive(Default)]
pub struct MockState {
    ops: Mutex<Vec<Op>>,
    names: Mutex<HashMap<String, Token>>,
    queue: Mutex<VecDeque<Token>>,
    callbacks: Mutex<Option<Arc<dyn EngineCallbacks>>>,
    terminated: AtomicBool,
    bind_stall: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl MockState {
    fn record(&self, op: Op) {
        self.ops.lock().expect("mock ops").push(op);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().expect("mock ops").clone()
    }

    pub fn count(&self, matches: impl Fn(&Op) -> bool) -> usize {
        self.ops().iter().filter(|op| matches(op)).count()
    }

    pub fn stall_next_bind(&self, entered: Sender<()>, release: Receiver<()>) {
        *self.bind_stall.lock().expect("mock stall") = Some((entered, release));
    }

    pub fn token_for(&self, name: &str) -> Option<Token> {
        self.names.lock().expect("mock names").get(name).copied()
    }

    fn callbacks(&self) -> Arc<dyn EngineCallbacks> {
        self.callbacks
            .lock()
            .expect("mock callbacks")
            .clone()
            .expect("engine created")
    }

    pub fn script_call(&self, name: &str, id: &str, req: &str) -> Option<CallResult> {
        let token = self.token_for(name)?;
        self.call_token(token, id, req)
    }

    pub fn call_token(&self, token: Token, id: &str, req: &str) -> Option<CallResult> {
        self.callbacks().on_call(self, id, req, token);
        self.ops().into_iter().rev().find_map(|op| match op {
            Op::Return(returned_id, result) if returned_id == id => Some(result),
            _ => None,
        })
    }
}

impl ResultSink for MockState {
    fn return_result(&self, id: &str, result: &CallResult) {
        self.record(Op::Return(id.to_string(), result.clone()));
    }
}

pub struct MockFactory {
    pub state: Arc<MockState>,
    pub fail: bool,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

impl EngineFactory for MockFactory {
    type Engine = MockEngine;

    fn create(
        &self,
        _debug: bool,
        _parent: Option<WindowHandle>,
        callbacks: Arc<dyn EngineCallbacks>,
    ) -> Option<MockEngine> {
        if self.fail {
            return None;
        }

        *self.state.callbacks.lock().expect("mock callbacks") = Some(callbacks);
        Some(MockEngine {
            state: self.state.clone(),
        })
    }
}

pub struct MockEngine {
    state: Arc<MockState>,
}

impl ResultSink for MockEngine {
    fn return_result(&self, id: &str, result: &CallResult) {
        self.state.return_result(id, result);
    }
}

impl Engine for MockEngine {
    fn destroy(&self) {
        self.state.record(Op::Destroy);
    }

    // FIFO, including work queued by the closures themselves.
    fn run(&self) {
        self.state.record(Op::Run);
        self.state.terminated.store(false, Ordering::SeqCst);

        while !self.state.terminated.load(Ordering::SeqCst) {
            let next = self.state.queue.lock().expect("mock queue").pop_front();
            match next {
                Some(token) => self.state.callbacks().on_dispatch(token),
                None => break,
            }
        }
    }

    fn terminate(&self) {
        self.state.record(Op::Terminate);
        self.state.terminated.store(true, Ordering::SeqCst);
    }

    fn window(&self) -> Option<WindowHandle> {
        WindowHandle::from_ptr(NonNull::<c_void>::dangling().as_ptr())
    }

    fn navigate(&self, url: &str) {
        self.state.record(Op::Navigate(url.to_string()));
    }

    fn set_html(&self, html: &str) {
        self.state.record(Op::SetHtml(html.to_string()));
    }

    fn set_title(&self, title: &str) {
        self.state.record(Op::SetTitle(title.to_string()));
    }

    fn set_size(&self, width: i32, height: i32, hint: Hint) {
        self.state.record(Op::SetSize(width, height, hint));
    }

    fn init(&self, js: &str) {
        self.state.record(Op::Init(js.to_string()));
    }

    fn eval(&self, js: &str) {
        self.state.record(Op::Eval(js.to_string()));
    }

    fn dispatch(&self, token: Token) {
        self.state.record(Op::Dispatch(token));
        self.state.queue.lock().expect("mock queue").push_back(token);
    }

    fn bind(&self, name: &str, token: Token) {
        let stall = self.state.bind_stall.lock().expect("mock stall").take();
        if let Some((entered, release)) = stall {
            entered.send(()).expect("report stalled bind");
            release.recv().expect("release stalled bind");
        }

        self.state.record(Op::Bind(name.to_string(), token));
        self.state
            .names
            .lock()
            .expect("mock names")
            .insert(name.to_string(), token);
    }

    fn unbind(&self, name: &str) {
        self.state.record(Op::Unbind(name.to_string()));
        self.state.names.lock().expect("mock names").remove(name);
    }
}
