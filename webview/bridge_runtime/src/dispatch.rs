use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::engine::{EngineCallbacks, ResultSink};
use crate::error::BridgeError;
use crate::protocol::CallResult;
use crate::registry::{Registry, Token};
use crate::returns::settle;

#[derive(Default)]
pub struct Bridge {
    registry: Registry,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Serves one script call. Lookup, decoding, invocation and encoding
    /// failures all settle as an error result; nothing escapes.
    pub fn handle_call(&self, id: &str, req: &str, token: Token) -> CallResult {
        let outcome = match self.registry.lookup_binding(token) {
            None => Err(BridgeError::BindingNotFound),
            Some(adapter) => {
                panic::catch_unwind(AssertUnwindSafe(|| adapter(id, req)))
                    .unwrap_or_else(|payload| Err(BridgeError::Panicked(panic_message(payload))))
                    .and_then(settle)
            }
        };

        if let Err(err) = &outcome {
            log::debug!("call {id} on token {token} rejected: {err}");
        }

        CallResult::from_outcome(outcome)
    }

    pub fn run_dispatch(&self, token: Token) {
        let Some(work) = self.registry.take_dispatch(token) else {
            log::debug!("no pending dispatch for token {token}");
            return;
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
            log::error!(
                "dispatched closure {token} panicked: {}",
                panic_message(payload)
            );
        }
    }
}

impl EngineCallbacks for Bridge {
    fn on_dispatch(&self, token: Token) {
        self.run_dispatch(token);
    }

    fn on_call(&self, sink: &dyn ResultSink, id: &str, req: &str, token: Token) {
        let result = self.handle_call(id, req, token);
        sink.return_result(id, &result);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
