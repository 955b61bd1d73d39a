use std::cell::RefCell;
use std::rc::Rc;

use adw::Application;
use adw::prelude::*;
use gtk4 as gtk;
use tokio::sync::broadcast::error::RecvError;

use roomchat::ChatError;
use roomchat::api::events::ConnectionEvent;
use roomchat::app::Route;
use roomchat::chat::{ChatSession, ChatState, DEFAULT_ROOM, FixedLocation, InsightsPanel};

use crate::ui::chat_view::ChatView;
use crate::ui::sidebar::Sidebar;
use crate::ui::{AppContext, alert, alert_then};
use crate::utils::run_async_to_main;

struct InsightsView {
    root: gtk::Box,
    button: gtk::Button,
    text: gtk::Label,
}

impl InsightsView {
    fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 8);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);
        root.set_width_request(260);

        let title = gtk::Label::new(Some("AI Insights"));
        title.add_css_class("heading");
        title.set_halign(gtk::Align::Start);
        root.append(&title);

        let button = gtk::Button::with_label("Generate Insights");
        root.append(&button);

        let text = gtk::Label::new(None);
        text.set_wrap(true);
        text.set_xalign(0.0);
        text.set_valign(gtk::Align::Start);
        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .child(&text)
            .build();
        root.append(&scroller);

        Self { root, button, text }
    }

    fn render(&self, panel: &InsightsPanel) {
        self.button.set_sensitive(!panel.loading);
        self.button.set_label(if panel.loading {
            "Analyzing..."
        } else {
            "Generate Insights"
        });
        self.text.set_label(&panel.text);
    }
}

fn render_status(label: &gtk::Label, connected: bool) {
    if connected {
        label.set_label("Connected");
        label.remove_css_class("error");
        label.add_css_class("success");
    } else {
        label.set_label("Disconnected");
        label.remove_css_class("success");
        label.add_css_class("error");
    }
}

fn log_out(app: &Application, ctx: &Rc<AppContext>, window: &adw::ApplicationWindow) {
    ctx.connections.close();
    if let Err(e) = ctx.store.clear_token() {
        log::error!("failed to clear token: {e}");
    }
    crate::ui::show_route(app, ctx, Route::Login);
    window.close();
}

fn report(window: &adw::ApplicationWindow, err: ChatError) {
    log::warn!("chat action failed: {err}");
    alert(window, &err.to_string());
}

pub fn show_main_window(app: &Application, ctx: &Rc<AppContext>, token: &str) {
    let conn = match ctx.connections.connect(token) {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("could not open chat connection: {e}");
            crate::ui::show_route(app, ctx, Route::Login);
            return;
        }
    };
    // Subscribe before sampling the flag so a Connected in between is not lost.
    let mut events = conn.subscribe();
    let session = ChatSession::new(conn.clone());
    let state = Rc::new(RefCell::new(ChatState::new()));
    state.borrow_mut().connected = conn.is_connected();
    let current_room = Rc::new(RefCell::new(DEFAULT_ROOM.to_string()));

    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("RoomChat")
        .default_width(1100)
        .default_height(680)
        .build();

    let split = adw::Flap::builder()
        .reveal_flap(true)
        .locked(true)
        .modal(false)
        .build();

    let sidebar = Rc::new(Sidebar::new());
    split.set_flap(Some(&sidebar.widget()));

    let chat = Rc::new(ChatView::new());
    let insights = Rc::new(InsightsView::new());
    let body = gtk::Box::new(gtk::Orientation::Horizontal, 0);
    body.append(&chat.widget());
    body.append(&gtk::Separator::new(gtk::Orientation::Vertical));
    body.append(&insights.root);
    split.set_content(Some(&body));

    let container = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    let title = gtk::Label::new(Some("RoomChat"));
    header.set_title_widget(Some(&title));
    let status = gtk::Label::new(None);
    render_status(&status, state.borrow().connected);
    header.pack_start(&status);
    let logout_btn = gtk::Button::with_label("Log out");
    header.pack_end(&logout_btn);
    container.append(&header);
    container.append(&split);
    window.set_content(Some(&container));

    // Fold connection events into the state on the main loop.
    {
        let app = app.clone();
        let ctx = ctx.clone();
        let window = window.clone();
        let state = state.clone();
        let sidebar = sidebar.clone();
        let chat = chat.clone();
        let status = status.clone();
        glib::spawn_future_local(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("skipped {n} chat events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if let ConnectionEvent::Rejected(reason) = &event {
                    log::warn!("connection rejected: {reason}");
                    let (app, ctx, win) = (app.clone(), ctx.clone(), window.clone());
                    alert_then(&window, reason, move || log_out(&app, &ctx, &win));
                    break;
                }
                let scroll = state.borrow_mut().apply(&event);
                let st = state.borrow();
                render_status(&status, st.connected);
                match &event {
                    ConnectionEvent::Server(_) if scroll => chat.render(&st.messages, true),
                    ConnectionEvent::Server(_) => sidebar.set_users(&st.roster),
                    _ => {}
                }
            }
        });
    }

    {
        let session = session.clone();
        let window = window.clone();
        let current_room = current_room.clone();
        let sidebar_for_join = sidebar.clone();
        sidebar.join_btn.connect_clicked(move |_| {
            let username = sidebar_for_join.username.text().to_string();
            let room = sidebar_for_join.room_name();
            *current_room.borrow_mut() = room.clone();
            let session = session.clone();
            let window = window.clone();
            run_async_to_main(
                async move { session.join(&username, &room).await },
                move |res| {
                    if let Err(e) = res {
                        report(&window, e);
                    }
                },
            );
        });
    }

    {
        let session = session.clone();
        let window = window.clone();
        let entry = chat.entry.clone();
        let send: Rc<dyn Fn()> = Rc::new(move || {
            let text = entry.text().to_string();
            if text.trim().is_empty() {
                return;
            }
            entry.set_text("");
            let session = session.clone();
            let window = window.clone();
            run_async_to_main(
                async move { session.send_message(&text).await },
                move |res| {
                    if let Err(e) = res {
                        report(&window, e);
                    }
                },
            );
        });
        {
            let send = send.clone();
            chat.send_btn.connect_clicked(move |_| (send)());
        }
        {
            let send = send.clone();
            chat.entry.connect_activate(move |_| (send)());
        }
    }

    {
        let session = session.clone();
        let window = window.clone();
        let provider = FixedLocation(ctx.config.location);
        chat.location_btn.connect_clicked(move |_| {
            if let Err(e) = session.share_location(&provider) {
                report(&window, e);
            }
        });
    }

    {
        let ctx = ctx.clone();
        let state = state.clone();
        let insights_for_click = insights.clone();
        insights.button.connect_clicked(move |_| {
            state.borrow_mut().insights.begin();
            insights_for_click.render(&state.borrow().insights);

            let api = ctx.api.clone();
            let room = current_room.borrow().clone();
            let state = state.clone();
            let view = insights_for_click.clone();
            run_async_to_main(
                async move { api.insights(&room).await },
                move |res| {
                    state.borrow_mut().insights.finish(res);
                    view.render(&state.borrow().insights);
                },
            );
        });
    }

    {
        let app = app.clone();
        let ctx = ctx.clone();
        let window_for_logout = window.clone();
        logout_btn.connect_clicked(move |_| log_out(&app, &ctx, &window_for_logout));
    }

    {
        let ctx = ctx.clone();
        window.connect_close_request(move |_| {
            ctx.connections.close();
            glib::Propagation::Proceed
        });
    }

    window.present();
}
