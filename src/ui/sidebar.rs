use crate::api::models::Pin;
use gtk4 as gtk;
use gtk4::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

pub struct Sidebar {
    root: gtk::Box,
    list: gtk::ListBox,
    items: Rc<RefCell<Vec<Pin>>>,
}

impl Sidebar {
    pub fn new(on_pick: impl Fn(Pin) + 'static) -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);

        let title = gtk::Label::new(Some("Contactos"));
        title.add_css_class("heading");
        title.set_halign(gtk::Align::Start);
        root.append(&title);

        let list = gtk::ListBox::new();
        list.add_css_class("navigation-sidebar");
        root.append(&list);

        let items: Rc<RefCell<Vec<Pin>>> = Rc::new(RefCell::new(Vec::new()));
        {
            let items = items.clone();
            list.connect_row_activated(move |_, row| {
                let picked = usize::try_from(row.index())
                    .ok()
                    .and_then(|idx| items.borrow().get(idx).cloned());
                if let Some(pin) = picked {
                    on_pick(pin);
                }
            });
        }

        Self { root, list, items }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn set_items(&self, items: Vec<Pin>) {
        while let Some(child) = self.list.first_child() {
            self.list.remove(&child);
        }
        for pin in &items {
            let row = gtk::ListBoxRow::new();
            let label = gtk::Label::new(Some(pin.as_str()));
            label.set_margin_top(8);
            label.set_margin_bottom(8);
            label.set_margin_start(8);
            label.set_margin_end(8);
            label.set_halign(gtk::Align::Start);
            row.set_child(Some(&label));
            self.list.append(&row);
        }
        *self.items.borrow_mut() = items;
    }
}
