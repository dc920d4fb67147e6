use crate::api::client::ApiClient;
use crate::app::AppConfig;
use adw::Application;
use adw::prelude::*;
use gtk4 as gtk;

/// First-run window asking for the chat server address.
pub fn show_setup_window(app: &Application) {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("PinChat")
        .default_width(420)
        .default_height(220)
        .resizable(false)
        .build();

    let toast_overlay = adw::ToastOverlay::new();

    let root = gtk::Box::new(gtk::Orientation::Vertical, 12);
    root.set_margin_top(24);
    root.set_margin_bottom(24);
    root.set_margin_start(24);
    root.set_margin_end(24);

    let title = gtk::Label::new(Some("Servidor de chat"));
    title.add_css_class("title-2");
    title.set_halign(gtk::Align::Start);
    root.append(&title);

    let server_entry = gtk::Entry::new();
    server_entry.set_placeholder_text(Some("http://localhost:5050"));
    server_entry.set_hexpand(true);
    root.append(&server_entry);

    let status = gtk::Label::new(None);
    status.add_css_class("dim-label");
    status.set_halign(gtk::Align::Start);
    root.append(&status);

    let connect_btn = gtk::Button::with_label("Conectar");
    connect_btn.add_css_class("suggested-action");
    connect_btn.set_halign(gtk::Align::End);
    root.append(&connect_btn);

    toast_overlay.set_child(Some(&root));
    let container = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    container.append(&header);
    container.append(&toast_overlay);
    window.set_content(Some(&container));

    let on_connect = {
        let app = app.clone();
        let window = window.clone();
        let overlay = toast_overlay.clone();
        let server_entry = server_entry.clone();
        move || {
            let url = crate::utils::normalize_url(&server_entry.text());
            if url.is_empty() {
                overlay.add_toast(adw::Toast::new("Ingresá la dirección del servidor."));
                return;
            }
            let config = AppConfig { server_url: url, ..AppConfig::load() };
            let client = match ApiClient::new(&config.server_url, config.timeout()) {
                Ok(client) => client,
                Err(e) => {
                    overlay.add_toast(adw::Toast::new(&e.to_string()));
                    return;
                }
            };

            status.set_label("Conectando…");
            let status_label = status.clone();
            let app2 = app.clone();
            let window2 = window.clone();
            let overlay2 = overlay.clone();
            crate::utils::run_async_to_main(async move { client.ping().await }, move |res| match res {
                Ok(code) => {
                    log::info!("server check: {} answered {code}", config.server_url);
                    if let Err(e) = config.save() {
                        overlay2.add_toast(adw::Toast::new(&format!("No se pudo guardar la configuración: {}", e)));
                    }
                    crate::ui::main_window::show_main_window(&app2, config);
                    window2.close();
                }
                Err(err) => {
                    log::warn!("server check failed: {err}");
                    status_label.set_label("Sin conexión");
                    overlay2.add_toast(adw::Toast::new("No se pudo contactar al servidor. Revisá la dirección."));
                }
            });
        }
    };

    use std::rc::Rc;
    let on_connect: Rc<dyn Fn()> = Rc::new(on_connect);
    {
        let on_connect = on_connect.clone();
        connect_btn.connect_clicked(move |_| (on_connect)());
    }
    server_entry.connect_activate(move |_| (on_connect)());

    window.present();
}
