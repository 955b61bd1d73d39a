pub mod chat_view;
pub mod login;
pub mod main_window;
pub mod sidebar;

use std::rc::Rc;

use adw::Application;
use adw::prelude::*;
use gtk4 as gtk;

use roomchat::api::client::ApiClient;
use roomchat::app::{AppConfig, Route, initial_route};
use roomchat::socket::ConnectionManager;
use roomchat::storage::LocalStore;

/// Everything the windows share. Lives on the GTK main thread.
pub struct AppContext {
    pub config: AppConfig,
    pub api: ApiClient,
    pub store: LocalStore,
    pub connections: ConnectionManager,
}

impl AppContext {
    pub fn load() -> roomchat::Result<Rc<Self>> {
        let config = AppConfig::load();
        let base_url = config.base_url()?;
        log::info!("chat server: {base_url}");
        let api = ApiClient::with_http(reqwest::Client::new(), base_url.clone());
        let store = LocalStore::open_default()?;
        let connections = ConnectionManager::new(
            base_url,
            config.socket.clone(),
            crate::utils::runtime_handle(),
        );
        Ok(Rc::new(Self {
            config,
            api,
            store,
            connections,
        }))
    }
}

pub fn build_ui(app: &Application) {
    let ctx = match AppContext::load() {
        Ok(ctx) => ctx,
        Err(e) => {
            log::error!("startup failed: {e}");
            app.quit();
            return;
        }
    };
    let route = initial_route(&ctx.store);
    show_route(app, &ctx, route);
}

pub fn show_route(app: &Application, ctx: &Rc<AppContext>, route: Route) {
    match route {
        Route::Login => login::show_login_window(app, ctx),
        Route::Chat { token } => main_window::show_main_window(app, ctx, &token),
    }
}

/// Modal error popup.
pub fn alert(parent: &impl IsA<gtk::Window>, text: &str) {
    alert_then(parent, text, || {});
}

/// Modal error popup that runs `then` once dismissed.
pub fn alert_then(parent: &impl IsA<gtk::Window>, text: &str, then: impl FnOnce() + 'static) {
    let dialog = gtk::MessageDialog::builder()
        .transient_for(parent)
        .modal(true)
        .message_type(gtk::MessageType::Error)
        .buttons(gtk::ButtonsType::Ok)
        .text(text)
        .build();
    let then = std::cell::Cell::new(Some(then));
    dialog.connect_response(move |dlg, _| {
        dlg.close();
        if let Some(then) = then.take() {
            then();
        }
    });
    dialog.present();
}
