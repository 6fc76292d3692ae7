use crate::actions::load_help_text;
use crate::app::{OutputSink, SessionController};
use crate::config::Settings;
use crate::model::{PathField, RunConfig};

use gtk4::gdk::Display;
use gtk4::glib::{timeout_add_local, ControlFlow};
use gtk4::prelude::*;
use gtk4::{
    Align, Application, ApplicationWindow, Box as GtkBox, Button, CssProvider, Entry,
    FileChooserAction, FileChooserDialog, Grid, Label, Orientation, PolicyType, ResponseType,
    ScrolledWindow, TextView, Window, WrapMode,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};

/// Widgets the controller writes to. Every method runs on the GTK main thread.
#[derive(Clone)]
struct WindowSink {
    output: TextView,
    time_label: Label,
    run_btn: Button,
}

impl OutputSink for WindowSink {
    fn append_text(&mut self, text: &str) {
        let buffer = self.output.buffer();
        buffer.place_cursor(&buffer.end_iter());
        buffer.insert_at_cursor(text);
        self.output
            .scroll_to_mark(&buffer.get_insert(), 0.0, false, 0.0, 0.0);
    }

    fn show_time(&mut self, text: &str) {
        self.time_label.set_text(text);
        self.time_label.set_visible(true);
    }

    fn set_run_enabled(&mut self, enabled: bool) {
        self.run_btn.set_sensitive(enabled);
    }
}

pub fn build_ui(app: &Application, settings: Rc<Settings>) {
    let controller = Rc::new(RefCell::new(SessionController::new()));

    let window = ApplicationWindow::builder()
        .application(app)
        .title("ELP Detector")
        .default_width(720)
        .default_height(480)
        .build();

    let provider = CssProvider::new();
    provider.load_from_data(
        r#"
        .output {
            font-family: "Courier New", monospace;
        }
        .time-label {
            font-size: 12px;
            margin-left: 10px;
        }
        "#,
    );
    if let Some(display) = Display::default() {
        gtk4::style_context_add_provider_for_display(
            &display,
            &provider,
            gtk4::STYLE_PROVIDER_PRIORITY_APPLICATION,
        );
    }

    let main_box = GtkBox::new(Orientation::Vertical, 8);
    main_box.set_margin_start(10);
    main_box.set_margin_end(10);
    main_box.set_margin_top(10);
    main_box.set_margin_bottom(10);

    // Folder rows
    let grid = Grid::new();
    grid.set_row_spacing(6);
    grid.set_column_spacing(8);

    let entries: Vec<Entry> = PathField::ALL
        .iter()
        .enumerate()
        .map(|(row, field)| {
            let label = Label::new(Some(field.label()));
            label.set_halign(Align::Start);

            let entry = Entry::new();
            entry.set_hexpand(true);
            entry.set_width_chars(40);

            let browse_btn = Button::with_label("Browse");
            let window_browse = window.clone();
            let entry_browse = entry.clone();
            browse_btn.connect_clicked(move |_| {
                choose_folder(&window_browse, &entry_browse);
            });

            grid.attach(&label, 0, row as i32, 1, 1);
            grid.attach(&entry, 1, row as i32, 1, 1);
            grid.attach(&browse_btn, 2, row as i32, 1, 1);
            entry
        })
        .collect();

    // Output panel
    let output = TextView::new();
    output.set_editable(false);
    output.set_cursor_visible(false);
    output.set_monospace(true);
    output.set_wrap_mode(WrapMode::WordChar);
    output.add_css_class("output");

    let scroller = ScrolledWindow::builder()
        .child(&output)
        .hscrollbar_policy(PolicyType::Automatic)
        .vexpand(true)
        .min_content_height(250)
        .build();

    // Elapsed time, hidden until the first run starts
    let time_label = Label::new(None);
    time_label.add_css_class("time-label");
    time_label.set_halign(Align::Start);
    time_label.set_visible(false);

    // Buttons
    let button_box = GtkBox::new(Orientation::Horizontal, 6);
    button_box.set_halign(Align::End);
    let help_btn = Button::with_label("Help");
    let run_btn = Button::with_label("Run");
    let cancel_btn = Button::with_label("Cancel");
    button_box.append(&help_btn);
    button_box.append(&run_btn);
    button_box.append(&cancel_btn);

    main_box.append(&grid);
    main_box.append(&scroller);
    main_box.append(&time_label);
    main_box.append(&button_box);
    window.set_child(Some(&main_box));

    let sink = WindowSink {
        output: output.clone(),
        time_label: time_label.clone(),
        run_btn: run_btn.clone(),
    };
    let refresh = settings.ui.refresh_interval();

    // Run
    let controller_run = controller.clone();
    let sink_run = sink.clone();
    let settings_run = settings.clone();
    let entries_run = entries.clone();
    run_btn.connect_clicked(move |_| {
        let config = RunConfig::new(
            entries_run[0].text().to_string(),
            entries_run[1].text().to_string(),
            entries_run[2].text().to_string(),
        );

        let mut sink = sink_run.clone();
        let started = controller_run
            .borrow_mut()
            .start_run(&config, &settings_run.pipeline, &mut sink);
        match started {
            Ok(()) => follow_run(controller_run.clone(), sink, refresh),
            Err(e) => warn!("Run ignored: {}", e),
        }
    });

    // Help
    let controller_help = controller.clone();
    let sink_help = sink.clone();
    let settings_help = settings.clone();
    let window_help = window.clone();
    let script_entry = entries[0].clone();
    help_btn.connect_clicked(move |_| {
        show_help_dialog(
            &window_help,
            &settings_help,
            controller_help.clone(),
            sink_help.clone(),
            script_entry.clone(),
        );
    });

    // Cancel closes the application; an in-flight pipeline is not stopped
    let app_cancel = app.clone();
    cancel_btn.connect_clicked(move |_| {
        app_cancel.quit();
    });

    window.present();
}

/// Drain runner events and refresh the time label until the run finishes
fn follow_run(controller: Rc<RefCell<SessionController>>, mut sink: WindowSink, refresh: Duration) {
    timeout_add_local(refresh, move || {
        let mut controller = controller.borrow_mut();
        let busy = controller.pump(&mut sink);
        controller.tick(&mut sink);
        if busy {
            ControlFlow::Continue
        } else {
            ControlFlow::Break
        }
    });
}

fn choose_folder(window: &ApplicationWindow, entry: &Entry) {
    let dialog = FileChooserDialog::new(
        Some("Select Directory"),
        Some(window),
        FileChooserAction::SelectFolder,
        &[("Cancel", ResponseType::Cancel), ("Select", ResponseType::Accept)],
    );
    dialog.set_modal(true);

    let entry = entry.clone();
    dialog.connect_response(move |dialog, response| {
        if response == ResponseType::Accept {
            if let Some(path) = dialog.file().and_then(|file| file.path()) {
                entry.set_text(&path.to_string_lossy());
            }
        }
        dialog.close();
    });
    dialog.show();
}

fn show_help_dialog(
    parent: &ApplicationWindow,
    settings: &Rc<Settings>,
    controller: Rc<RefCell<SessionController>>,
    sink: WindowSink,
    script_entry: Entry,
) {
    let dialog = Window::builder()
        .title("ELP Detector Help")
        .transient_for(parent)
        .modal(true)
        .default_width(800)
        .default_height(500)
        .build();

    let help_text = match load_help_text(&settings.ui.help_file) {
        Ok(text) => text,
        Err(e) => {
            warn!("{}", e);
            e.to_string()
        }
    };

    let content = GtkBox::new(Orientation::Vertical, 10);
    content.set_margin_start(20);
    content.set_margin_end(20);
    content.set_margin_top(20);
    content.set_margin_bottom(20);

    let instructions = TextView::new();
    instructions.set_editable(false);
    instructions.set_wrap_mode(WrapMode::Word);
    instructions.buffer().set_text(&help_text);

    let scroller = ScrolledWindow::builder()
        .child(&instructions)
        .vexpand(true)
        .build();

    let button_box = GtkBox::new(Orientation::Horizontal, 6);
    button_box.set_halign(Align::End);
    let install_btn = Button::with_label("Install Dependencies");
    install_btn.set_sensitive(!controller.borrow().is_busy());
    let ok_btn = Button::with_label("Ok");
    ok_btn.set_width_request(200);
    button_box.append(&install_btn);
    button_box.append(&ok_btn);

    content.append(&scroller);
    content.append(&button_box);
    dialog.set_child(Some(&content));

    let refresh = settings.ui.refresh_interval();
    let settings_install = settings.clone();
    let dialog_install = dialog.clone();
    install_btn.connect_clicked(move |_| {
        let script_dir = script_entry.text().to_string();
        let mut sink = sink.clone();
        let started = controller
            .borrow_mut()
            .start_install(&script_dir, &settings_install.pipeline, &mut sink);
        match started {
            Ok(()) => {
                info!("Installing requirements for {}", script_dir);
                follow_run(controller.clone(), sink, refresh);
                dialog_install.close();
            }
            Err(e) => warn!("Install ignored: {}", e),
        }
    });

    let dialog_ok = dialog.clone();
    ok_btn.connect_clicked(move |_| {
        dialog_ok.close();
    });

    dialog.present();
}
