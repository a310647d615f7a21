//! Engine backed by the webview C library, loaded at run time.
//!
//! Callbacks from C enter through two `extern "C"` trampolines. Each carries
//! a boxed argument holding a weak engine context and the registry token, so
//! no process-wide state is involved and several engines can coexist.

use libloading::Library;
use std::collections::HashMap;
use std::ffi::{CStr, CString, OsStr, c_char, c_int, c_void};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::config;
use crate::engine::{Engine, EngineCallbacks, EngineFactory, Hint, ResultSink, WindowHandle};
use crate::error::BridgeError;
use crate::protocol::CallResult;
use crate::registry::Token;

type Webview = *mut c_void;
type DispatchCallback = extern "C" fn(Webview, *mut c_void);
type BindCallback = extern "C" fn(*const c_char, *const c_char, *mut c_void);

/// Entry points resolved from `webview.h`.
#[derive(Clone, Copy)]
struct Api {
    create: unsafe extern "C" fn(c_int, *mut c_void) -> Webview,
    destroy: unsafe extern "C" fn(Webview),
    run: unsafe extern "C" fn(Webview),
    terminate: unsafe extern "C" fn(Webview),
    dispatch: unsafe extern "C" fn(Webview, DispatchCallback, *mut c_void),
    get_window: unsafe extern "C" fn(Webview) -> *mut c_void,
    set_title: unsafe extern "C" fn(Webview, *const c_char),
    set_size: unsafe extern "C" fn(Webview, c_int, c_int, c_int),
    navigate: unsafe extern "C" fn(Webview, *const c_char),
    set_html: unsafe extern "C" fn(Webview, *const c_char),
    init: unsafe extern "C" fn(Webview, *const c_char),
    eval: unsafe extern "C" fn(Webview, *const c_char),
    bind: unsafe extern "C" fn(Webview, *const c_char, BindCallback, *mut c_void),
    unbind: unsafe extern "C" fn(Webview, *const c_char),
    return_result: unsafe extern "C" fn(Webview, *const c_char, c_int, *const c_char),
}

macro_rules! symbol {
    ($library:expr, $name:literal) => {{
        // SAFETY: the field type receiving this symbol mirrors its C
        // declaration in webview.h.
        let symbol = unsafe { $library.get(concat!($name, "\0").as_bytes()) }?;
        *symbol
    }};
}

impl Api {
    fn resolve(library: &Library) -> Result<Self, BridgeError> {
        Ok(Self {
            create: symbol!(library, "webview_create"),
            destroy: symbol!(library, "webview_destroy"),
            run: symbol!(library, "webview_run"),
            terminate: symbol!(library, "webview_terminate"),
            dispatch: symbol!(library, "webview_dispatch"),
            get_window: symbol!(library, "webview_get_window"),
            set_title: symbol!(library, "webview_set_title"),
            set_size: symbol!(library, "webview_set_size"),
            navigate: symbol!(library, "webview_navigate"),
            set_html: symbol!(library, "webview_set_html"),
            init: symbol!(library, "webview_init"),
            eval: symbol!(library, "webview_eval"),
            bind: symbol!(library, "webview_bind"),
            unbind: symbol!(library, "webview_unbind"),
            return_result: symbol!(library, "webview_return"),
        })
    }
}

/// A loaded webview library; creates [`NativeEngine`]s.
pub struct NativeLibrary {
    api: Api,
    library: Arc<Library>,
}

impl NativeLibrary {
    pub fn open(path: impl AsRef<OsStr>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initializers; the webview
        // library has no initialization side effects beyond its own state.
        let library = unsafe { Library::new(path) }?;
        let api = Api::resolve(&library)?;
        log::debug!("loaded webview library from {}", path.to_string_lossy());

        Ok(Self {
            api,
            library: Arc::new(library),
        })
    }

    /// Opens the library named by `WEBVIEW_LIBRARY`, or the platform default.
    pub fn from_env() -> Result<Self, BridgeError> {
        Self::open(config::library_path_from_env())
    }
}

impl EngineFactory for NativeLibrary {
    type Engine = NativeEngine;

    fn create(
        &self,
        debug: bool,
        parent: Option<WindowHandle>,
        callbacks: Arc<dyn EngineCallbacks>,
    ) -> Option<NativeEngine> {
        let parent = parent.map_or(ptr::null_mut(), WindowHandle::as_ptr);
        // SAFETY: `parent` is null or a platform window handle supplied by
        // the caller.
        let raw = unsafe { (self.api.create)(c_int::from(debug), parent) };
        let webview = NonNull::new(raw)?;

        Some(NativeEngine {
            context: Arc::new(Context {
                api: self.api,
                webview: RawWebview(webview),
                callbacks,
                destroyed: AtomicBool::new(false),
                bound: Mutex::new(HashMap::new()),
                retired: Mutex::new(Vec::new()),
                pending: Mutex::new(HashMap::new()),
                _library: self.library.clone(),
            }),
        })
    }
}

struct RawWebview(NonNull<c_void>);

// SAFETY: the handle is only dereferenced by the webview library, which
// serializes cross-thread calls onto its own loop or requires the caller to
// be on the UI thread.
unsafe impl Send for RawWebview {}
unsafe impl Sync for RawWebview {}

struct Context {
    api: Api,
    webview: RawWebview,
    callbacks: Arc<dyn EngineCallbacks>,
    destroyed: AtomicBool,
    // Arguments whose addresses were handed to the library. The context owns
    // them, so a callback holding the context never reads a freed argument.
    bound: Mutex<HashMap<String, Box<CallbackArg>>>,
    retired: Mutex<Vec<Box<CallbackArg>>>,
    pending: Mutex<HashMap<usize, Box<CallbackArg>>>,
    _library: Arc<Library>,
}

impl Context {
    fn webview(&self) -> Webview {
        self.webview.0.as_ptr()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl ResultSink for Context {
    fn return_result(&self, id: &str, result: &CallResult) {
        if self.is_destroyed() {
            log::debug!("dropping result for call {id}: webview destroyed");
            return;
        }

        let (Ok(id), Ok(body)) = (CString::new(id), CString::new(result.body.as_str())) else {
            log::warn!("dropping result for call {id}: interior NUL byte");
            return;
        };

        // SAFETY: live handle; both strings outlive the call and the library
        // copies them.
        unsafe {
            (self.api.return_result)(self.webview(), id.as_ptr(), result.status.code(), body.as_ptr())
        };
    }
}

struct CallbackArg {
    context: Weak<Context>,
    token: Token,
}

impl CallbackArg {
    fn new(context: &Arc<Context>, token: Token) -> Box<Self> {
        Box::new(Self {
            context: Arc::downgrade(context),
            token,
        })
    }

    fn as_raw(&self) -> *mut c_void {
        ptr::from_ref(self).cast_mut().cast()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Copies the owning context and token out of a callback argument.
///
/// # Safety
///
/// `arg` must be null or point at a `CallbackArg` owned by a context. The
/// library delivers no callbacks after `webview_destroy`, and a context
/// outlives its webview.
unsafe fn resolve(arg: *mut c_void) -> Option<(Arc<Context>, Token)> {
    if arg.is_null() {
        return None;
    }
    // SAFETY: guaranteed by the caller.
    let arg = unsafe { &*arg.cast::<CallbackArg>() };
    Some((arg.context.upgrade()?, arg.token))
}

extern "C" fn dispatch_trampoline(_webview: Webview, arg: *mut c_void) {
    // SAFETY: `arg` came from `NativeEngine::dispatch` and stays in the
    // context's pending table until released below.
    let Some((context, token)) = (unsafe { resolve(arg) }) else {
        return;
    };
    lock(&context.pending).remove(&(arg as usize));

    if context.is_destroyed() {
        return;
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| context.callbacks.on_dispatch(token)));
    if outcome.is_err() {
        log::error!("dispatch callback for token {token} panicked");
    }
}

extern "C" fn binding_trampoline(id: *const c_char, req: *const c_char, arg: *mut c_void) {
    // SAFETY: `arg` came from `NativeEngine::bind` and is owned by the
    // context for its whole lifetime.
    let Some((context, token)) = (unsafe { resolve(arg) }) else {
        log::error!("binding callback invoked without a live context");
        return;
    };
    if id.is_null() {
        log::error!("binding callback invoked without call id");
        return;
    }
    if context.is_destroyed() {
        return;
    }

    // SAFETY: the library passes NUL-terminated strings valid for the call.
    let id = unsafe { CStr::from_ptr(id) }.to_string_lossy();
    let req = if req.is_null() {
        "[]".into()
    } else {
        // SAFETY: as above.
        unsafe { CStr::from_ptr(req) }.to_string_lossy()
    };

    // `context` is owned here, so the call may destroy the engine.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        context.callbacks.on_call(context.as_ref(), &id, &req, token);
    }));

    if outcome.is_err() {
        log::error!("binding callback for call {id} panicked");
        context.return_result(&id, &CallResult::error("binding callback panicked"));
    }
}

/// A webview window created through [`NativeLibrary`].
pub struct NativeEngine {
    context: Arc<Context>,
}

impl NativeEngine {
    fn live(&self) -> Option<Webview> {
        if self.context.is_destroyed() {
            None
        } else {
            Some(self.context.webview())
        }
    }

    fn api(&self) -> &Api {
        &self.context.api
    }

    fn with_text(&self, what: &str, text: &str, call: impl FnOnce(Webview, *const c_char)) {
        let Some(webview) = self.live() else {
            return;
        };

        match CString::new(text) {
            Ok(text) => call(webview, text.as_ptr()),
            Err(_) => log::warn!("{what} contains an interior NUL byte; ignored"),
        }
    }
}

impl ResultSink for NativeEngine {
    fn return_result(&self, id: &str, result: &CallResult) {
        self.context.return_result(id, result);
    }
}

impl Engine for NativeEngine {
    fn destroy(&self) {
        if self.context.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        // SAFETY: the handle is live and destroyed exactly once.
        unsafe { (self.api().destroy)(self.context.webview()) };

        let abandoned = mem::take(&mut *lock(&self.context.pending));
        if !abandoned.is_empty() {
            log::debug!("released {} undelivered dispatch callback(s)", abandoned.len());
        }
    }

    fn run(&self) {
        if let Some(webview) = self.live() {
            // SAFETY: live handle; blocks until terminate or window close.
            unsafe { (self.api().run)(webview) };
        }
    }

    fn terminate(&self) {
        if let Some(webview) = self.live() {
            // SAFETY: live handle.
            unsafe { (self.api().terminate)(webview) };
        }
    }

    fn window(&self) -> Option<WindowHandle> {
        let webview = self.live()?;
        // SAFETY: live handle.
        WindowHandle::from_ptr(unsafe { (self.api().get_window)(webview) })
    }

    fn navigate(&self, url: &str) {
        let navigate = self.api().navigate;
        // SAFETY: live handle and NUL-terminated text.
        self.with_text("url", url, |webview, text| unsafe { navigate(webview, text) });
    }

    fn set_html(&self, html: &str) {
        let set_html = self.api().set_html;
        // SAFETY: live handle and NUL-terminated text.
        self.with_text("html", html, |webview, text| unsafe { set_html(webview, text) });
    }

    fn set_title(&self, title: &str) {
        let set_title = self.api().set_title;
        // SAFETY: live handle and NUL-terminated text.
        self.with_text("title", title, |webview, text| unsafe { set_title(webview, text) });
    }

    fn set_size(&self, width: i32, height: i32, hint: Hint) {
        if let Some(webview) = self.live() {
            // SAFETY: live handle.
            unsafe { (self.api().set_size)(webview, width, height, hint.code()) };
        }
    }

    fn init(&self, js: &str) {
        let init = self.api().init;
        // SAFETY: live handle and NUL-terminated text.
        self.with_text("init script", js, |webview, text| unsafe { init(webview, text) });
    }

    fn eval(&self, js: &str) {
        let eval = self.api().eval;
        // SAFETY: live handle and NUL-terminated text.
        self.with_text("eval script", js, |webview, text| unsafe { eval(webview, text) });
    }

    fn dispatch(&self, token: Token) {
        let Some(webview) = self.live() else {
            return;
        };

        let arg = CallbackArg::new(&self.context, token);
        let raw = arg.as_raw();
        lock(&self.context.pending).insert(raw as usize, arg);
        // SAFETY: `raw` stays owned by the pending table until the
        // trampoline or `destroy` releases it.
        unsafe { (self.api().dispatch)(webview, dispatch_trampoline, raw) };
    }

    // Names reach here already checked for NUL bytes by `Surface::bind`.
    fn bind(&self, name: &str, token: Token) {
        let Some(webview) = self.live() else {
            return;
        };
        let Ok(cname) = CString::new(name) else {
            log::warn!("binding name {name:?} contains an interior NUL byte; ignored");
            return;
        };

        let mut bound = lock(&self.context.bound);
        if let Some(previous) = bound.remove(name) {
            // SAFETY: live handle; the library rejects duplicate names, so
            // the old entry point is removed first.
            unsafe { (self.api().unbind)(webview, cname.as_ptr()) };
            lock(&self.context.retired).push(previous);
        }

        let arg = CallbackArg::new(&self.context, token);
        // SAFETY: `arg` is kept in `bound` or `retired` for the context's
        // lifetime, so the pointer stays valid.
        unsafe { (self.api().bind)(webview, cname.as_ptr(), binding_trampoline, arg.as_raw()) };
        bound.insert(name.to_string(), arg);
    }

    fn unbind(&self, name: &str) {
        let Some(webview) = self.live() else {
            return;
        };
        let Ok(cname) = CString::new(name) else {
            log::warn!("binding name {name:?} contains an interior NUL byte; ignored");
            return;
        };

        // SAFETY: live handle.
        unsafe { (self.api().unbind)(webview, cname.as_ptr()) };

        let removed = lock(&self.context.bound).remove(name);
        if let Some(arg) = removed {
            lock(&self.context.retired).push(arg);
        }
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::Surface;
    use crate::dispatch::Bridge;
    use std::sync::atomic::AtomicUsize;

    static RETURNS: Mutex<Vec<(String, i32, String)>> = Mutex::new(Vec::new());
    static BINDS: Mutex<Vec<(String, BindCallback, usize)>> = Mutex::new(Vec::new());
    static DESTROYED: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    // Every fake webview gets its own address so parallel tests can tell
    // their handles apart.
    extern "C" fn fake_create(_debug: c_int, _parent: *mut c_void) -> Webview {
        Box::into_raw(Box::new(0_u8)).cast()
    }

    extern "C" fn fake_null_create(_debug: c_int, _parent: *mut c_void) -> Webview {
        ptr::null_mut()
    }

    extern "C" fn fake_destroy(webview: Webview) {
        DESTROYED.lock().expect("destroyed").push(webview as usize);
    }

    extern "C" fn fake_unit(_webview: Webview) {}

    extern "C" fn fake_get_window(webview: Webview) -> *mut c_void {
        webview
    }

    extern "C" fn fake_text(_webview: Webview, _text: *const c_char) {}

    extern "C" fn fake_set_size(_webview: Webview, _w: c_int, _h: c_int, _hint: c_int) {}

    // Runs the callback inline, as a loop that is already running would.
    extern "C" fn fake_dispatch(webview: Webview, callback: DispatchCallback, arg: *mut c_void) {
        callback(webview, arg);
    }

    // Never delivers, as a loop that is torn down before draining its queue.
    extern "C" fn fake_dispatch_lost(_webview: Webview, _callback: DispatchCallback, _arg: *mut c_void) {}

    extern "C" fn fake_bind(
        _webview: Webview,
        name: *const c_char,
        callback: BindCallback,
        arg: *mut c_void,
    ) {
        let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
        BINDS
            .lock()
            .expect("binds")
            .push((name, callback, arg as usize));
    }

    extern "C" fn fake_return(
        _webview: Webview,
        id: *const c_char,
        status: c_int,
        body: *const c_char,
    ) {
        let id = unsafe { CStr::from_ptr(id) }.to_string_lossy().into_owned();
        let body = unsafe { CStr::from_ptr(body) }.to_string_lossy().into_owned();
        RETURNS.lock().expect("returns").push((id, status, body));
    }

    fn fake_api(create: unsafe extern "C" fn(c_int, *mut c_void) -> Webview) -> Api {
        Api {
            create,
            destroy: fake_destroy,
            run: fake_unit,
            terminate: fake_unit,
            dispatch: fake_dispatch,
            get_window: fake_get_window,
            set_title: fake_text,
            set_size: fake_set_size,
            navigate: fake_text,
            set_html: fake_text,
            init: fake_text,
            eval: fake_text,
            bind: fake_bind,
            unbind: fake_text,
            return_result: fake_return,
        }
    }

    fn this_process(create: unsafe extern "C" fn(c_int, *mut c_void) -> Webview) -> NativeLibrary {
        NativeLibrary {
            api: fake_api(create),
            library: Arc::new(libloading::os::unix::Library::this().into()),
        }
    }

    fn invoke_bound(name: &str, id: &str, req: &str) {
        let (callback, arg) = BINDS
            .lock()
            .expect("binds")
            .iter()
            .rev()
            .find(|(bound, _, _)| bound == name)
            .map(|(_, callback, arg)| (*callback, *arg))
            .expect("binding registered with the library");

        let id = CString::new(id).expect("id");
        let req = CString::new(req).expect("req");
        callback(id.as_ptr(), req.as_ptr(), arg as *mut c_void);
    }

    fn returned(id: &str) -> Option<(i32, String)> {
        RETURNS
            .lock()
            .expect("returns")
            .iter()
            .find(|(returned_id, _, _)| returned_id == id)
            .map(|(_, status, body)| (*status, body.clone()))
    }

    fn destroy_count(handle: usize) -> usize {
        DESTROYED
            .lock()
            .expect("destroyed")
            .iter()
            .filter(|destroyed| **destroyed == handle)
            .count()
    }

    fn handle_of(surface: &Surface<NativeEngine>) -> usize {
        surface.window().expect("live window").as_ptr() as usize
    }

    #[test]
    fn missing_library_is_a_library_error() {
        let err = NativeLibrary::open("/nonexistent/libwebview-missing.so")
            .err()
            .expect("expected load failure");
        assert!(matches!(err, BridgeError::Library(_)));
    }

    #[test]
    fn null_handle_means_no_engine() {
        let library = this_process(fake_null_create);
        let surface = Surface::create(&library, false);
        assert!(!surface.is_created());
        assert!(surface.window().is_none());
    }

    #[test]
    fn calls_round_trip_through_trampolines() {
        let library = this_process(fake_create);
        let surface = Surface::create(&library, true);
        assert!(surface.is_created());
        let handle = handle_of(&surface);

        surface
            .bind("native.add", |a: i64, b: i64| a + b)
            .expect("bind native.add");
        invoke_bound("native.add", "n1", "[2,3]");
        invoke_bound("native.add", "n2", r#"[2,"x"]"#);

        assert_eq!(returned("n1"), Some((0, "5".to_string())));
        let (status, body) = returned("n2").expect("n2 settled");
        assert_eq!(status, -1);
        assert!(body.contains("argument 1"), "{body}");

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        surface.dispatch(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(surface.bridge().registry().pending_dispatches(), 0);

        surface.destroy();
        surface.destroy();
        assert_eq!(destroy_count(handle), 1);
    }

    #[test]
    fn nul_in_binding_name_is_rejected_before_registration() {
        let library = this_process(fake_create);
        let surface = Surface::create(&library, false);

        let err = surface.bind("bad\0name", || 1).expect_err("expected invalid name");
        assert!(matches!(err, BridgeError::InvalidName(_)));
        assert_eq!(surface.bridge().registry().binding_count(), 0);
        assert!(
            BINDS
                .lock()
                .expect("binds")
                .iter()
                .all(|(name, _, _)| !name.starts_with("bad"))
        );
        assert!(matches!(
            surface.unbind("bad\0name"),
            Err(BridgeError::InvalidName(_))
        ));
    }

    #[test]
    fn binding_that_destroys_its_surface_gets_no_late_return() {
        let library = this_process(fake_create);
        let surface = Arc::new(Surface::create(&library, false));
        let handle = handle_of(&surface);

        let weak = Arc::downgrade(&surface);
        surface
            .bind("native.close", move || {
                if let Some(surface) = weak.upgrade() {
                    surface.destroy();
                }
                1
            })
            .expect("bind native.close");

        invoke_bound("native.close", "close-1", "[]");

        assert_eq!(destroy_count(handle), 1);
        assert!(!surface.is_created());
        assert_eq!(returned("close-1"), None);
        assert_eq!(surface.bridge().registry().binding_count(), 0);
    }

    #[test]
    fn undelivered_dispatch_arguments_are_released_on_destroy() {
        let mut library = this_process(fake_create);
        library.api.dispatch = fake_dispatch_lost;
        let engine = library
            .create(false, None, Arc::new(Bridge::new()))
            .expect("engine");

        engine.dispatch(7);
        engine.dispatch(8);
        assert_eq!(lock(&engine.context.pending).len(), 2);

        engine.destroy();
        assert!(lock(&engine.context.pending).is_empty());

        engine.dispatch(9);
        assert!(lock(&engine.context.pending).is_empty());
    }
}
