use std::path::PathBuf;

/// Overrides the shared library the native engine is loaded from.
pub const LIBRARY_ENV: &str = "WEBVIEW_LIBRARY";

/// Platform file name of the webview library (`libwebview.so`,
/// `libwebview.dylib` or `webview.dll`).
pub fn default_library_name() -> PathBuf {
    PathBuf::from(libloading::library_filename("webview"))
}

pub fn library_path_from_env() -> PathBuf {
    parse_library_path(std::env::var_os(LIBRARY_ENV).map(PathBuf::from))
}

fn parse_library_path(raw: Option<PathBuf>) -> PathBuf {
    raw.filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(default_library_name)
}
