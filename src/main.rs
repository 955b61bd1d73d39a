mod ui;
mod utils;

use adw::Application;
use adw::prelude::*;

fn main() -> glib::ExitCode {
    roomchat::app::init_logging();
    let app = Application::builder()
        .application_id("com.example.RoomChatGtk")
        .build();
    app.connect_activate(|app| {
        crate::ui::build_ui(app);
    });
    app.run()
}
