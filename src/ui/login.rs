use std::rc::Rc;

use adw::Application;
use adw::prelude::*;
use gtk4 as gtk;

use roomchat::app::Route;

use crate::ui::AppContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Login,
    Register,
}

impl AuthMode {
    fn title(self) -> &'static str {
        match self {
            AuthMode::Login => "Login",
            AuthMode::Register => "Register",
        }
    }

    fn failure(self) -> &'static str {
        match self {
            AuthMode::Login => "Login failed",
            AuthMode::Register => "Register failed",
        }
    }

    fn other(self) -> (Self, &'static str) {
        match self {
            AuthMode::Login => (AuthMode::Register, "No account? Register"),
            AuthMode::Register => (AuthMode::Login, "Have account? Login"),
        }
    }
}

pub fn show_login_window(app: &Application, ctx: &Rc<AppContext>) {
    show_auth_window(app, ctx, AuthMode::Login);
}

fn show_auth_window(app: &Application, ctx: &Rc<AppContext>, mode: AuthMode) {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title(mode.title())
        .default_width(420)
        .default_height(300)
        .resizable(false)
        .build();

    let root = gtk::Box::new(gtk::Orientation::Vertical, 12);
    root.set_margin_top(24);
    root.set_margin_bottom(24);
    root.set_margin_start(24);
    root.set_margin_end(24);

    let title = gtk::Label::new(Some(mode.title()));
    title.add_css_class("title-2");
    title.set_halign(gtk::Align::Start);
    root.append(&title);

    let error = gtk::Label::new(None);
    error.add_css_class("error");
    error.set_halign(gtk::Align::Start);
    error.set_visible(false);
    root.append(&error);

    let form = gtk::Box::new(gtk::Orientation::Vertical, 8);
    let name_entry = gtk::Entry::new();
    name_entry.set_placeholder_text(Some("Name"));
    if mode == AuthMode::Register {
        form.append(&name_entry);
    }
    let email_entry = gtk::Entry::new();
    email_entry.set_placeholder_text(Some("Email"));
    form.append(&email_entry);
    let pass_entry = gtk::PasswordEntry::new();
    pass_entry.set_placeholder_text(Some("Password"));
    form.append(&pass_entry);
    root.append(&form);

    let submit_btn = gtk::Button::with_label(mode.title());
    submit_btn.add_css_class("suggested-action");
    root.append(&submit_btn);

    let (other_mode, other_label) = mode.other();
    let switch_btn = gtk::Button::with_label(other_label);
    switch_btn.add_css_class("flat");
    switch_btn.set_halign(gtk::Align::Start);
    root.append(&switch_btn);

    let container = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    let header_title = gtk::Label::new(Some("RoomChat"));
    header.set_title_widget(Some(&header_title));
    container.append(&header);
    container.append(&root);
    window.set_content(Some(&container));

    {
        let app = app.clone();
        let ctx = ctx.clone();
        let window_for_switch = window.clone();
        switch_btn.connect_clicked(move |_| {
            show_auth_window(&app, &ctx, other_mode);
            window_for_switch.close();
        });
    }

    let on_submit = {
        let app = app.clone();
        let ctx = ctx.clone();
        let window = window.clone();
        let submit_btn = submit_btn.clone();
        let name_entry = name_entry.clone();
        let email_entry = email_entry.clone();
        let pass_entry = pass_entry.clone();
        let error = error.clone();
        move || {
            if !submit_btn.is_sensitive() {
                return;
            }
            let name = name_entry.text().to_string();
            let email = email_entry.text().to_string();
            let password = pass_entry.text().to_string();

            error.set_visible(false);
            submit_btn.set_sensitive(false);
            submit_btn.set_label("Please wait...");

            let api = ctx.api.clone();
            let request = async move {
                match mode {
                    AuthMode::Login => api.login(&email, &password).await,
                    AuthMode::Register => api.register(&name, &email, &password).await,
                }
            };

            let app = app.clone();
            let ctx = ctx.clone();
            let window = window.clone();
            let submit_btn = submit_btn.clone();
            let error = error.clone();
            crate::utils::run_async_to_main(request, move |res| {
                submit_btn.set_sensitive(true);
                submit_btn.set_label(mode.title());
                match res {
                    Ok(token) => {
                        if let Err(e) = ctx.store.set_token(&token) {
                            log::error!("failed to persist token: {e}");
                        }
                        crate::ui::show_route(&app, &ctx, Route::Chat { token });
                        window.close();
                    }
                    Err(err) => {
                        log::warn!("{} failed: {err}", mode.title());
                        error.set_label(&err.user_message(mode.failure()));
                        error.set_visible(true);
                    }
                }
            });
        }
    };

    let on_submit: Rc<dyn Fn()> = Rc::new(on_submit);
    {
        let on_submit = on_submit.clone();
        submit_btn.connect_clicked(move |_| (on_submit)());
    }
    {
        let on_submit = on_submit.clone();
        pass_entry.connect_activate(move |_| (on_submit)());
    }

    window.present();
}
