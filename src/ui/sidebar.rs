use gtk4::prelude::*;
use gtk4 as gtk;

use roomchat::chat::DEFAULT_ROOM;

/// Room picker plus the list of users online in the room.
pub struct Sidebar {
    root: gtk::Box,
    pub username: gtk::Entry,
    pub room: gtk::Entry,
    pub join_btn: gtk::Button,
    list: gtk::ListBox,
}

impl Sidebar {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);
        root.set_width_request(220);

        let username = gtk::Entry::new();
        username.set_placeholder_text(Some("Username"));
        root.append(&username);

        let room = gtk::Entry::new();
        room.set_placeholder_text(Some("Room"));
        room.set_text(DEFAULT_ROOM);
        root.append(&room);

        let join_btn = gtk::Button::with_label("Join");
        join_btn.add_css_class("suggested-action");
        root.append(&join_btn);

        let title = gtk::Label::new(Some("Online"));
        title.add_css_class("heading");
        title.set_halign(gtk::Align::Start);
        title.set_margin_top(12);
        root.append(&title);

        let list = gtk::ListBox::new();
        list.set_selection_mode(gtk::SelectionMode::None);
        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .child(&list)
            .build();
        root.append(&scroller);

        Self {
            root,
            username,
            room,
            join_btn,
            list,
        }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    /// Room to join; blank falls back to the default room.
    pub fn room_name(&self) -> String {
        let room = self.room.text().trim().to_string();
        if room.is_empty() {
            DEFAULT_ROOM.to_string()
        } else {
            room
        }
    }

    pub fn set_users(&self, users: &[String]) {
        while let Some(child) = self.list.first_child() {
            self.list.remove(&child);
        }
        for name in users {
            let row = gtk::ListBoxRow::new();
            let label = gtk::Label::new(Some(name));
            label.set_margin_top(4);
            label.set_margin_bottom(4);
            label.set_margin_start(8);
            label.set_margin_end(8);
            label.set_halign(gtk::Align::Start);
            row.set_child(Some(&label));
            self.list.append(&row);
        }
    }
}
