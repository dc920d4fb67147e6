use crate::session::{Bubble, BubbleKind};
use gtk4 as gtk;
use gtk4::prelude::*;

pub struct ChatView {
    root: gtk::Box,
    scroller: gtk::ScrolledWindow,
    messages: gtk::Box,
    entry: gtk::Entry,
}

impl ChatView {
    pub fn new(on_send: impl Fn(String) + 'static) -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);

        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .hexpand(true)
            .build();
        let messages = gtk::Box::new(gtk::Orientation::Vertical, 6);
        scroller.set_child(Some(&messages));
        root.append(&scroller);

        // Input row
        let input_row = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        let entry = gtk::Entry::new();
        entry.set_hexpand(true);
        entry.set_placeholder_text(Some("Escribí un mensaje…"));
        let send_btn = gtk::Button::with_label("Enviar");
        send_btn.add_css_class("suggested-action");
        input_row.append(&entry);
        input_row.append(&send_btn);
        root.append(&input_row);

        {
            use std::rc::Rc;
            let entry_for_send = entry.clone();
            let send: Rc<dyn Fn()> = Rc::new(move || on_send(entry_for_send.text().to_string()));
            {
                let send = send.clone();
                send_btn.connect_clicked(move |_| (send)());
            }
            entry.connect_activate(move |_| (send)());
        }

        Self { root, scroller, messages, entry }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn append(&self, bubble: &Bubble) {
        let wrap = gtk::Box::new(gtk::Orientation::Vertical, 2);
        let (align, class) = match bubble.kind {
            BubbleKind::Own => (gtk::Align::End, "bubble-self"),
            BubbleKind::Peer => (gtk::Align::Start, "bubble-user"),
            BubbleKind::System => (gtk::Align::Center, "bubble-system"),
        };
        wrap.set_halign(align);
        wrap.add_css_class(class);

        let meta = gtk::Label::new(Some(&bubble.time));
        meta.add_css_class("caption");
        meta.add_css_class("dim-label");
        meta.set_halign(align);
        let body = gtk::Label::new(Some(&bubble.text));
        body.set_wrap(true);
        body.set_selectable(true);
        body.set_halign(align);
        if bubble.kind == BubbleKind::System {
            body.add_css_class("dim-label");
        }
        wrap.append(&meta);
        wrap.append(&body);
        self.messages.append(&wrap);

        let adj = self.scroller.vadjustment();
        adj.set_value(adj.upper());
    }

    pub fn clear(&self) {
        while let Some(child) = self.messages.first_child() {
            self.messages.remove(&child);
        }
    }

    pub fn clear_input(&self) {
        self.entry.set_text("");
    }
}
