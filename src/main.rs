mod actions;
mod app;
mod config;
mod logging;
mod model;
mod runner;
mod ui;

use config::Settings;
use gtk4::prelude::*;
use gtk4::{glib, Application};
use std::rc::Rc;
use tracing::{info, warn};

const APP_ID: &str = "org.elp.Detector";

fn main() -> glib::ExitCode {
    let path = config::config_path();
    let (settings, config_err) = match &path {
        Some(path) => Settings::load_or_default(path),
        None => (Settings::default(), None),
    };

    logging::init_tracing(&settings.logging.level);
    if let Some(e) = config_err {
        warn!("Using default settings: {}", e);
    }
    if let Some(path) = &path {
        info!("Settings file: {}", path.display());
    }

    let settings = Rc::new(settings);
    let app = Application::builder().application_id(APP_ID).build();

    app.connect_activate(move |app| {
        ui::build_ui(app, settings.clone());
    });

    app.run()
}
