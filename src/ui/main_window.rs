use crate::app::AppConfig;
use crate::controller::UserCommand;
use crate::session::ViewUpdate;
use crate::ui::chat_view::ChatView;
use crate::ui::sidebar::Sidebar;
use adw::Application;
use adw::prelude::*;
use std::rc::Rc;
use tokio::sync::mpsc;

pub fn show_main_window(app: &Application, config: AppConfig) {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("PinChat")
        .default_width(960)
        .default_height(640)
        .build();

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UserCommand>();
    let (view_tx, view_rx) = mpsc::unbounded_channel::<ViewUpdate>();

    let overlay = adw::ToastOverlay::new();

    let split = adw::Flap::builder()
        .reveal_flap(true)
        .locked(true)
        .modal(false)
        .build();

    let sidebar = {
        let cmd_tx = cmd_tx.clone();
        Rc::new(Sidebar::new(move |pin| {
            let _ = cmd_tx.send(UserCommand::PickContact(pin));
        }))
    };
    split.set_flap(Some(&sidebar.widget()));

    let chat = {
        let cmd_tx = cmd_tx.clone();
        Rc::new(ChatView::new(move |text| {
            let _ = cmd_tx.send(UserCommand::Send(text));
        }))
    };

    // Partner PIN row above the log
    let content = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
    let connect_row = gtk4::Box::new(gtk4::Orientation::Horizontal, 6);
    connect_row.set_margin_top(8);
    connect_row.set_margin_start(8);
    connect_row.set_margin_end(8);
    let partner_entry = gtk4::Entry::new();
    partner_entry.set_hexpand(true);
    partner_entry.set_placeholder_text(Some("PIN de tu contacto"));
    let connect_btn = gtk4::Button::with_label("Conectar");
    connect_row.append(&partner_entry);
    connect_row.append(&connect_btn);
    content.append(&connect_row);
    content.append(&chat.widget());
    split.set_content(Some(&content));

    overlay.set_child(Some(&split));

    let container = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    let title = adw::WindowTitle::new("PinChat", "Registrando…");
    header.set_title_widget(Some(&title));

    let clear_btn = gtk4::Button::with_label("Limpiar");
    header.pack_end(&clear_btn);
    let retry_btn = gtk4::Button::with_label("Reintentar PIN");
    header.pack_start(&retry_btn);
    container.append(&header);
    container.append(&overlay);
    window.set_content(Some(&container));
    window.present();

    {
        let connect: Rc<dyn Fn()> = {
            let cmd_tx = cmd_tx.clone();
            let partner_entry = partner_entry.clone();
            Rc::new(move || {
                let _ = cmd_tx.send(UserCommand::Connect(partner_entry.text().to_string()));
            })
        };
        {
            let connect = connect.clone();
            connect_btn.connect_clicked(move |_| (connect)());
        }
        partner_entry.connect_activate(move |_| (connect)());
    }
    {
        let cmd_tx = cmd_tx.clone();
        clear_btn.connect_clicked(move |_| {
            let _ = cmd_tx.send(UserCommand::Clear);
        });
    }
    {
        let cmd_tx = cmd_tx.clone();
        retry_btn.connect_clicked(move |_| {
            let _ = cmd_tx.send(UserCommand::RetryRegistration);
        });
    }

    crate::utils::attach_to_main(view_rx, {
        let chat = chat.clone();
        let sidebar = sidebar.clone();
        let title = title.clone();
        let retry_btn = retry_btn.clone();
        move |update| match update {
            ViewUpdate::Bubble(bubble) => chat.append(&bubble),
            ViewUpdate::ClearLog => chat.clear(),
            ViewUpdate::OwnPin(pin) => {
                title.set_subtitle(&format!("Tu PIN: {pin}"));
                retry_btn.set_visible(false);
            }
            ViewUpdate::Target(pin) => title.set_title(&format!("PinChat · {pin}")),
            ViewUpdate::Contacts(list) => sidebar.set_items(list),
            ViewUpdate::ClearInput => chat.clear_input(),
        }
    });

    // The session ends once every widget holding a command sender is gone.
    let overlay_clone = overlay.clone();
    crate::utils::run_async_to_main(crate::app::run_session(config, view_tx, cmd_rx), move |res| {
        if let Err(err) = res {
            log::error!("session ended: {err}");
            overlay_clone.add_toast(adw::Toast::new(&format!("No se pudo conectar: {}", err)));
        }
    });
}
