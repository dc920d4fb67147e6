use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

pub static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
});

/// Run `fut` on the tokio runtime and hand its output to `on_done` on the
/// GTK main loop.
#[cfg(feature = "gui")]
pub fn run_async_to_main<T, Fut>(fut: Fut, on_done: impl FnOnce(T) + 'static)
where
    T: Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
{
    let handle = RUNTIME.spawn(fut);
    glib::MainContext::default().spawn_local(async move {
        match handle.await {
            Ok(value) => on_done(value),
            Err(e) => log::error!("background task failed: {e}"),
        }
    });
}

/// Drain `rx` on the GTK main loop.
#[cfg(feature = "gui")]
pub fn attach_to_main<T: 'static>(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<T>,
    mut on_item: impl FnMut(T) + 'static,
) {
    glib::MainContext::default().spawn_local(async move {
        while let Some(item) = rx.recv().await {
            on_item(item);
        }
    });
}

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`;
/// records from the `log` facade are forwarded.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// The chat backend is plain HTTP by default, so a bare host gets `http://`.
pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

pub fn now_hhmm() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}
