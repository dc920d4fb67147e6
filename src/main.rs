use pinchat::app::AppConfig;
use pinchat::utils;

fn main() {
    utils::init_logging("warn");

    #[cfg(feature = "gui")]
    if !std::env::args().any(|arg| arg == "--console") {
        run_gui();
        return;
    }

    if let Err(e) = utils::RUNTIME.block_on(pinchat::console::run(AppConfig::load())) {
        log::error!("console session failed: {e}");
        eprintln!("pinchat: {e}");
        std::process::exit(1);
    }
}

#[cfg(feature = "gui")]
fn run_gui() {
    use adw::prelude::*;

    let app = adw::Application::builder()
        .application_id("com.example.PinChat")
        .build();
    app.connect_activate(|app| {
        if let Err(e) = pinchat::storage::SqliteStore::open_default() {
            log::warn!("local store unavailable: {e}");
        }
        pinchat::app::build_ui(app);
    });
    app.run();
}
