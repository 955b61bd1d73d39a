use gtk4::prelude::*;
use gtk4 as gtk;

use roomchat::api::models::ChatMessage;

/// Message list with the composer underneath.
pub struct ChatView {
    root: gtk::Box,
    scroller: gtk::ScrolledWindow,
    messages_box: gtk::Box,
    pub entry: gtk::Entry,
    pub send_btn: gtk::Button,
    pub location_btn: gtk::Button,
}

impl ChatView {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);

        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .hexpand(true)
            .build();
        let messages_box = gtk::Box::new(gtk::Orientation::Vertical, 8);
        scroller.set_child(Some(&messages_box));
        root.append(&scroller);

        let input_row = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        let entry = gtk::Entry::new();
        entry.set_hexpand(true);
        entry.set_placeholder_text(Some("Type a message…"));
        let location_btn = gtk::Button::with_label("Location");
        let send_btn = gtk::Button::with_label("Send");
        send_btn.add_css_class("suggested-action");
        input_row.append(&entry);
        input_row.append(&location_btn);
        input_row.append(&send_btn);
        root.append(&input_row);

        Self {
            root,
            scroller,
            messages_box,
            entry,
            send_btn,
            location_btn,
        }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    /// Rebuild the list. With `scroll`, jump to the newest message once
    /// layout has caught up.
    pub fn render(&self, messages: &[ChatMessage], scroll: bool) {
        while let Some(child) = self.messages_box.first_child() {
            self.messages_box.remove(&child);
        }
        for msg in messages {
            self.messages_box.append(&message_row(msg));
        }
        if scroll {
            let scroller = self.scroller.clone();
            glib::idle_add_local_once(move || {
                let adj = scroller.vadjustment();
                adj.set_value(adj.upper() - adj.page_size());
            });
        }
    }
}

fn message_row(msg: &ChatMessage) -> gtk::Widget {
    let row = gtk::Box::new(gtk::Orientation::Vertical, 2);
    row.set_halign(gtk::Align::Start);

    let header = gtk::Label::new(Some(&msg.header()));
    header.add_css_class("caption");
    header.add_css_class("dim-label");
    header.set_halign(gtk::Align::Start);
    row.append(&header);

    if let Some(url) = msg.url.as_deref().filter(|_| msg.is_location()) {
        let link = gtk::LinkButton::with_label(url, "Shared location");
        link.set_halign(gtk::Align::Start);
        row.append(&link);
    } else {
        let body = gtk::Label::new(msg.text.as_deref());
        body.set_wrap(true);
        body.set_selectable(true);
        body.set_xalign(0.0);
        row.append(&body);
    }

    row.upcast()
}
