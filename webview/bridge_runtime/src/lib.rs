pub mod args;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod function;
pub mod native;
pub mod protocol;
pub mod registry;
pub mod returns;
pub mod signature;

#[cfg(test)]
mod testing;

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;

pub use crate::args::Variadic;
pub use crate::dispatch::Bridge;
pub use crate::engine::{Engine, EngineCallbacks, EngineFactory, Hint, ResultSink, WindowHandle};
pub use crate::error::BridgeError;
pub use crate::function::{Binding, DynamicFunction, HostFn};
pub use crate::native::{NativeEngine, NativeLibrary};
pub use crate::protocol::{CallResult, Status};
pub use crate::registry::{Registry, Token};
pub use crate::returns::{IntoReturn, Json, Returned};
pub use crate::signature::{Arity, ReturnKind, Signature, TypeTag};
pub use serde_json;

/// One rendering window and the bridge serving its script calls.
///
/// A surface whose engine failed to create, or that has been destroyed,
/// turns every operation into a no-op; `bind` and `unbind` report
/// [`BridgeError::NotCreated`] instead.
pub struct Surface<E: Engine> {
    engine: RwLock<Option<Arc<E>>>,
    bridge: Arc<Bridge>,
    // Serializes bind and unbind so the engine and the registry agree on
    // which token a name maps to.
    binding: Mutex<()>,
}

impl<E: Engine> Surface<E> {
    pub fn create<F>(factory: &F, debug: bool) -> Self
    where
        F: EngineFactory<Engine = E>,
    {
        Self::create_windowed(factory, debug, None)
    }

    pub fn create_windowed<F>(factory: &F, debug: bool, parent: Option<WindowHandle>) -> Self
    where
        F: EngineFactory<Engine = E>,
    {
        let bridge = Arc::new(Bridge::new());
        let engine = factory.create(debug, parent, bridge.clone());

        if engine.is_none() {
            log::error!("webview engine returned no handle; surface operations are no-ops");
        }

        Self {
            engine: RwLock::new(engine.map(Arc::new)),
            bridge,
            binding: Mutex::new(()),
        }
    }

    /// Like [`Surface::create_windowed`], but fails instead of returning a
    /// degraded surface.
    pub fn try_create<F>(
        factory: &F,
        debug: bool,
        parent: Option<WindowHandle>,
    ) -> Result<Self, BridgeError>
    where
        F: EngineFactory<Engine = E>,
    {
        let surface = Self::create_windowed(factory, debug, parent);
        if surface.is_created() {
            Ok(surface)
        } else {
            Err(BridgeError::CreationFailed)
        }
    }

    // The engine is cloned out so no lock is held while calling into it.
    fn engine(&self) -> Option<Arc<E>> {
        self.engine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_created(&self) -> bool {
        self.engine().is_some()
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Destroys the engine and drops every pending closure and binding.
    /// Later calls, including a second `destroy`, do nothing.
    pub fn destroy(&self) {
        let engine = self
            .engine
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(engine) = engine {
            engine.destroy();
            self.bridge.registry().clear();
        }
    }

    pub fn run(&self) {
        if let Some(engine) = self.engine() {
            engine.run();
        }
    }

    pub fn terminate(&self) {
        if let Some(engine) = self.engine() {
            engine.terminate();
        }
    }

    /// Schedules `work` on the UI thread. Without a live engine the work
    /// runs on a detached thread instead of being dropped.
    pub fn dispatch<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The insert happens under the read lock, so it lands either before
        // `destroy` clears the registry or not at all.
        let (engine, token) = {
            let guard = self.engine.read().unwrap_or_else(PoisonError::into_inner);
            let Some(engine) = guard.as_ref() else {
                log::debug!("no live surface; running dispatched work on a detached thread");
                thread::spawn(work);
                return;
            };
            (engine.clone(), self.bridge.registry().insert_dispatch(Box::new(work)))
        };

        engine.dispatch(token);
    }

    pub fn window(&self) -> Option<WindowHandle> {
        self.engine().and_then(|engine| engine.window())
    }

    pub fn set_title(&self, title: &str) {
        if let Some(engine) = self.engine() {
            engine.set_title(title);
        }
    }

    pub fn set_size(&self, width: i32, height: i32, hint: Hint) {
        if let Some(engine) = self.engine() {
            engine.set_size(width, height, hint);
        }
    }

    pub fn navigate(&self, url: &str) {
        if let Some(engine) = self.engine() {
            engine.navigate(url);
        }
    }

    pub fn set_html(&self, html: &str) {
        if let Some(engine) = self.engine() {
            engine.set_html(html);
        }
    }

    pub fn init(&self, js: &str) {
        if let Some(engine) = self.engine() {
            engine.init(js);
        }
    }

    pub fn eval(&self, js: &str) {
        if let Some(engine) = self.engine() {
            engine.eval(js);
        }
    }

    /// Exposes `function` to script as `name`, replacing any binding of the
    /// same name.
    pub fn bind<F, M>(&self, name: &str, function: F) -> Result<(), BridgeError>
    where
        F: HostFn<M>,
    {
        if !self.is_created() {
            return Err(BridgeError::NotCreated);
        }
        check_name(name)?;
        let binding = Binding::new(function)?;
        let _binding = self.binding.lock().unwrap_or_else(PoisonError::into_inner);

        let registry = self.bridge.registry();
        let (engine, token, replaced) = {
            let guard = self.engine.read().unwrap_or_else(PoisonError::into_inner);
            let engine = guard.as_ref().ok_or(BridgeError::NotCreated)?.clone();
            let (token, replaced) = registry.insert_binding(name, binding);
            (engine, token, replaced)
        };
        log::debug!("bound '{name}' to token {token}");

        engine.bind(name, token);
        if let Some(previous) = replaced {
            registry.remove_binding(previous);
        }

        Ok(())
    }

    pub fn unbind(&self, name: &str) -> Result<(), BridgeError> {
        let engine = self.engine().ok_or(BridgeError::NotCreated)?;
        check_name(name)?;
        let _binding = self.binding.lock().unwrap_or_else(PoisonError::into_inner);
        engine.unbind(name);

        if self.bridge.registry().remove_binding_named(name).is_none() {
            log::debug!("unbind of unknown name '{name}'");
        }

        Ok(())
    }
}

fn check_name(name: &str) -> Result<(), BridgeError> {
    if name.contains('\0') {
        return Err(BridgeError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl<E: Engine> Drop for Surface<E> {
    fn drop(&mut self) {
        self.destroy();
    }
}
