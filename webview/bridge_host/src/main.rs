mod logger;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Weak};
use webview_bridge_runtime::config::{LIBRARY_ENV, default_library_name};
use webview_bridge_runtime::{Hint, NativeEngine, NativeLibrary, Surface, Variadic};

const PLACEHOLDER_HTML: &str =
    "If you see this that means the webview succeeded, you can use me now.";

/// Opens a webview window with a small set of host bindings.
///
/// Script can call `hostInfo()`, `hostLog(...parts)` and `hostQuit()`;
/// each returns a promise settled by the host.
///
/// ENVIRONMENT VARIABLES:
///     WEBVIEW_LIBRARY     Path of the webview shared library
///     WEBVIEW_BRIDGE_LOG  Log level (error, warn, info, debug, trace)
#[derive(Parser, Debug)]
#[command(name = "bridge_host")]
#[command(version)]
struct Cli {
    /// URL to open
    #[arg(conflicts_with = "html")]
    url: Option<String>,

    /// HTML file shown instead of a URL
    #[arg(long)]
    html: Option<PathBuf>,

    /// Script file injected before every page load
    #[arg(long)]
    init: Option<PathBuf>,

    /// Window title
    #[arg(long, env = "WEBVIEW_TITLE", default_value = "Webview")]
    title: String,

    #[arg(long, default_value_t = 480)]
    width: i32,

    #[arg(long, default_value_t = 320)]
    height: i32,

    /// Size hint: none, min, max or fixed
    #[arg(long, default_value = "none")]
    hint: Hint,

    /// Enable the engine's developer tools
    #[arg(long, env = "WEBVIEW_DEBUG")]
    debug: bool,

    /// Webview shared library
    #[arg(long, env = LIBRARY_ENV)]
    library: Option<PathBuf>,

    #[arg(long, env = "WEBVIEW_BRIDGE_LOG", default_value = "info")]
    log_level: LevelFilter,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = logger::init(cli.log_level) {
        eprintln!("bridge_host: logger already installed: {err}");
    }

    if let Err(err) = run(cli) {
        log::error!("{err:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let library_path = cli.library.clone().unwrap_or_else(default_library_name);
    let library = NativeLibrary::open(&library_path)
        .with_context(|| format!("failed to load {}", library_path.display()))?;

    let surface = Arc::new(
        Surface::try_create(&library, cli.debug, None).context("failed to create webview")?,
    );

    surface.set_title(&cli.title);
    surface.set_size(cli.width, cli.height, cli.hint);
    install_bindings(&surface, &cli)?;

    if let Some(path) = &cli.init {
        surface.init(&read_text(path)?);
    }

    match (&cli.url, &cli.html) {
        (Some(url), _) => surface.navigate(url),
        (None, Some(path)) => surface.set_html(&read_text(path)?),
        (None, None) => surface.set_html(PLACEHOLDER_HTML),
    }

    log::info!("running '{}'", cli.title);
    surface.run();
    surface.destroy();
    Ok(())
}

fn install_bindings(surface: &Arc<Surface<NativeEngine>>, cli: &Cli) -> Result<()> {
    let info = host_info(cli);
    surface.bind("hostInfo", move || info.clone())?;

    surface.bind("hostLog", |parts: Variadic<Value>| {
        let line: Vec<String> = parts
            .iter()
            .map(|part| match part {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect();
        log::info!("script: {}", line.join(" "));
    })?;

    // Weak, so the binding does not keep its own surface alive.
    let weak: Weak<Surface<NativeEngine>> = Arc::downgrade(surface);
    surface.bind("hostQuit", move || {
        if let Some(surface) = weak.upgrade() {
            surface.terminate();
        }
    })?;

    Ok(())
}

fn host_info(cli: &Cli) -> Value {
    json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "title": cli.title,
        "debug": cli.debug,
        "os": std::env::consts::OS,
    })
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_window() {
        let cli = Cli::try_parse_from(["bridge_host"]).expect("parse defaults");
        assert_eq!(cli.width, 480);
        assert_eq!(cli.height, 320);
        assert_eq!(cli.hint, Hint::None);
        assert!(cli.url.is_none());
        assert!(cli.html.is_none());
    }

    #[test]
    fn hint_and_url_parse() {
        let cli = Cli::try_parse_from([
            "bridge_host",
            "--hint",
            "FIXED",
            "--log-level",
            "debug",
            "https://example.com",
        ])
        .expect("parse");
        assert_eq!(cli.hint, Hint::Fixed);
        assert_eq!(cli.log_level, LevelFilter::Debug);
        assert_eq!(cli.url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn url_and_html_conflict() {
        let err = Cli::try_parse_from(["bridge_host", "--html", "page.html", "https://example.com"])
            .expect_err("conflicting sources");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn unknown_hint_rejected() {
        assert!(Cli::try_parse_from(["bridge_host", "--hint", "wide"]).is_err());
    }

    #[test]
    fn host_info_reports_title() {
        let cli = Cli::try_parse_from(["bridge_host", "--title", "Basic Example"]).expect("parse");
        let info = host_info(&cli);
        assert_eq!(info["title"], "Basic Example");
        assert_eq!(info["name"], "bridge_host");
    }
}
