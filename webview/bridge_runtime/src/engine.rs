use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::protocol::CallResult;
use crate::registry::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hint {
    #[default]
    None,
    Min,
    Max,
    Fixed,
}

impl Hint {
    /// Value of the matching `WEBVIEW_HINT_*` constant.
    pub fn code(self) -> i32 {
        match self {
            Hint::None => 0,
            Hint::Min => 1,
            Hint::Max => 2,
            Hint::Fixed => 3,
        }
    }
}

impl std::str::FromStr for Hint {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "none" => Ok(Hint::None),
            "min" => Ok(Hint::Min),
            "max" => Ok(Hint::Max),
            "fixed" => Ok(Hint::Fixed),
            other => Err(format!("unknown size hint '{other}' (expected none|min|max|fixed)")),
        }
    }
}

/// Platform window handle (GtkWindow, NSWindow or HWND).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHandle(NonNull<c_void>);

impl WindowHandle {
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

pub trait ResultSink {
    fn return_result(&self, id: &str, result: &CallResult);
}

pub trait EngineCallbacks: Send + Sync {
    fn on_dispatch(&self, token: Token);

    /// Runs when script calls a bound name. Implementations settle the call
    /// through `sink` exactly once.
    fn on_call(&self, sink: &dyn ResultSink, id: &str, req: &str, token: Token);
}

/// A live rendering surface.
///
/// Content and lifecycle calls are only valid on the UI thread; `dispatch`,
/// `bind`, `unbind` and `eval` are serialized onto the loop by the engine.
pub trait Engine: ResultSink + Send + Sync + 'static {
    fn destroy(&self);
    /// Blocks until [`Engine::terminate`] is called or the window closes.
    fn run(&self);
    fn terminate(&self);
    fn window(&self) -> Option<WindowHandle>;
    fn navigate(&self, url: &str);
    fn set_html(&self, html: &str);
    fn set_title(&self, title: &str);
    fn set_size(&self, width: i32, height: i32, hint: Hint);
    fn init(&self, js: &str);
    fn eval(&self, js: &str);
    /// Asks the engine to call [`EngineCallbacks::on_dispatch`] with `token`
    /// on the UI thread.
    fn dispatch(&self, token: Token);
    fn bind(&self, name: &str, token: Token);
    fn unbind(&self, name: &str);
}

pub trait EngineFactory {
    type Engine: Engine;

    /// Returns `None` when the engine cannot produce a surface.
    fn create(
        &self,
        debug: bool,
        parent: Option<WindowHandle>,
        callbacks: Arc<dyn EngineCallbacks>,
    ) -> Option<Self::Engine>;
}
