use crate::config::PipelineSettings;
use crate::model::{format_elapsed, RunConfig};
use crate::runner::{self, RunEvent, RunOutcome};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Where the controller writes what the user sees.
///
/// Implemented by the main window on the UI thread; tests use a recorder.
pub trait OutputSink {
    /// Insert `text` at the end of the output panel
    fn append_text(&mut self, text: &str);
    /// Show the time label with `text`
    fn show_time(&mut self, text: &str);
    /// Enable or disable the actions that start a run
    fn set_run_enabled(&mut self, enabled: bool);
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ControllerError {
    #[error("a run is already in progress")]
    AlreadyRunning,
}

/// What a watched event stream belongs to; names it in user-facing messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunKind {
    #[default]
    Pipeline,
    Install,
}

impl RunKind {
    pub fn name(&self) -> &'static str {
        match self {
            RunKind::Pipeline => "Pipeline",
            RunKind::Install => "Dependency install",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
}

/// Timing and lifecycle of one run
#[derive(Debug, Clone)]
pub struct RunSession {
    pub state: SessionState,
    started_at: Option<Instant>,
    elapsed: Duration,
    outcome: Option<RunOutcome>,
}

impl Default for RunSession {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            started_at: None,
            elapsed: Duration::ZERO,
            outcome: None,
        }
    }
}

impl RunSession {
    fn start(&mut self, now: Instant) {
        self.state = SessionState::Running;
        self.started_at = Some(now);
        self.elapsed = Duration::ZERO;
    }

    /// Recompute elapsed time; frozen once the session completes
    fn update(&mut self, now: Instant) -> Duration {
        if self.state == SessionState::Running {
            if let Some(started_at) = self.started_at {
                self.elapsed = now.saturating_duration_since(started_at);
            }
        }
        self.elapsed
    }

    fn complete(&mut self, now: Instant, outcome: RunOutcome) {
        self.update(now);
        self.state = SessionState::Completed;
        self.outcome = Some(outcome);
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }
}

/// Owns the current run and turns runner events into sink updates
#[derive(Debug, Default)]
pub struct SessionController {
    session: RunSession,
    kind: RunKind,
    events: Option<Receiver<RunEvent>>,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &RunSession {
        &self.session
    }

    /// Is there a run whose events are still pending
    pub fn is_busy(&self) -> bool {
        self.events.is_some()
    }

    /// Launch the detector pipeline for `config`
    pub fn start_run(
        &mut self,
        config: &RunConfig,
        settings: &PipelineSettings,
        sink: &mut impl OutputSink,
    ) -> Result<(), ControllerError> {
        self.ensure_idle()?;
        self.watch(runner::start_pipeline(config, settings), RunKind::Pipeline, sink)
    }

    /// Install the pipeline requirements, streaming pip's output like a run
    pub fn start_install(
        &mut self,
        script_dir: &str,
        settings: &PipelineSettings,
        sink: &mut impl OutputSink,
    ) -> Result<(), ControllerError> {
        self.ensure_idle()?;
        self.watch(runner::start_install(script_dir, settings), RunKind::Install, sink)
    }

    /// Follow an already started event stream
    pub fn watch(
        &mut self,
        events: Receiver<RunEvent>,
        kind: RunKind,
        sink: &mut impl OutputSink,
    ) -> Result<(), ControllerError> {
        self.ensure_idle()?;
        self.session = RunSession::default();
        self.kind = kind;
        self.events = Some(events);
        sink.set_run_enabled(false);
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), ControllerError> {
        if self.is_busy() {
            warn!("Run requested while another is in progress");
            return Err(ControllerError::AlreadyRunning);
        }
        Ok(())
    }

    /// Apply every pending event without blocking. Returns `true` while the run is in flight.
    pub fn pump(&mut self, sink: &mut impl OutputSink) -> bool {
        loop {
            let Some(events) = &self.events else {
                return false;
            };

            match events.try_recv() {
                Ok(event) => self.handle_event(event, sink),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => {
                    warn!("Runner went away without finishing");
                    self.handle_event(RunEvent::Finished(RunOutcome::NotStarted), sink);
                }
            }
        }
    }

    /// Refresh the elapsed-time label while running
    pub fn tick(&mut self, sink: &mut impl OutputSink) {
        self.tick_at(Instant::now(), sink);
    }

    fn tick_at(&mut self, now: Instant, sink: &mut impl OutputSink) {
        if self.session.state == SessionState::Running {
            let elapsed = self.session.update(now);
            sink.show_time(&format!("Time Elapsed: {}", format_elapsed(elapsed)));
        }
    }

    pub fn handle_event(&mut self, event: RunEvent, sink: &mut impl OutputSink) {
        self.handle_event_at(event, Instant::now(), sink);
    }

    fn handle_event_at(&mut self, event: RunEvent, now: Instant, sink: &mut impl OutputSink) {
        match event {
            RunEvent::MissingPath(field) => {
                sink.append_text(&format!("{}\n", field.missing_message()));
            }
            RunEvent::Started(at) => {
                // The clock runs from when the worker saw the process start
                self.session.start(at);
                let elapsed = self.session.update(now);
                sink.show_time(&format!("Time Elapsed: {}", format_elapsed(elapsed)));
            }
            RunEvent::Line(line) => {
                if !line.is_empty() {
                    sink.append_text(&line);
                }
            }
            RunEvent::SpawnFailed(msg) => {
                error!("{} failed to launch: {}", self.kind.name(), msg);
                sink.append_text(&format!("{} failed to launch: {}\n", self.kind.name(), msg));
            }
            RunEvent::Finished(outcome) => {
                self.session.complete(now, outcome);
                self.events = None;

                let name = self.kind.name();
                if let RunOutcome::Exited { code } = outcome {
                    if !outcome.is_success() {
                        let note = match code {
                            Some(code) => format!("{} exited with status {}\n", name, code),
                            None => format!("{} was terminated by a signal\n", name),
                        };
                        sink.append_text(&note);
                    }
                }

                let total = format_elapsed(self.session().elapsed());
                info!("{} finished ({:?}) in {}", name, self.session().outcome(), total);
                sink.show_time(&format!("Run complete. Total Time: {}", total));
                sink.set_run_enabled(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PathField;
    use std::sync::mpsc;

    #[derive(Debug)]
    struct RecordingSink {
        text: String,
        time: Option<String>,
        run_enabled: bool,
    }

    impl Default for RecordingSink {
        fn default() -> Self {
            Self {
                text: String::new(),
                time: None,
                run_enabled: true,
            }
        }
    }

    impl OutputSink for RecordingSink {
        fn append_text(&mut self, text: &str) {
            self.text.push_str(text);
        }

        fn show_time(&mut self, text: &str) {
            self.time = Some(text.to_string());
        }

        fn set_run_enabled(&mut self, enabled: bool) {
            self.run_enabled = enabled;
        }
    }

    #[test]
    fn empty_script_dir_completes_without_running() {
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();
        let config = RunConfig::new("", "/x", "/y");

        controller
            .start_run(&config, &PipelineSettings::default(), &mut sink)
            .unwrap();
        assert!(!controller.pump(&mut sink));

        assert_eq!(sink.text, "Please select a script directory before running.\n");
        assert_eq!(controller.session().state, SessionState::Completed);
        assert_eq!(controller.session().outcome(), Some(RunOutcome::NotStarted));
        assert_eq!(controller.session().elapsed(), Duration::ZERO);
        assert_eq!(sink.time.as_deref(), Some("Run complete. Total Time: 00:00"));
        assert!(sink.run_enabled);
    }

    #[test]
    fn every_missing_field_is_reported_once() {
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();

        controller
            .start_run(&RunConfig::default(), &PipelineSettings::default(), &mut sink)
            .unwrap();
        controller.pump(&mut sink);

        let expected: String = PathField::ALL
            .iter()
            .map(|f| format!("{}\n", f.missing_message()))
            .collect();
        assert_eq!(sink.text, expected);
    }

    #[test]
    fn streamed_lines_end_up_in_order_and_label_switches() {
        let (tx, rx) = mpsc::channel();
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();
        controller.watch(rx, RunKind::Pipeline, &mut sink).unwrap();
        assert!(!sink.run_enabled);

        tx.send(RunEvent::Started(Instant::now())).unwrap();
        tx.send(RunEvent::Line("loading model\n".into())).unwrap();
        assert!(controller.pump(&mut sink));
        assert_eq!(controller.session().state, SessionState::Running);
        assert_eq!(sink.time.as_deref(), Some("Time Elapsed: 00:00"));

        tx.send(RunEvent::Line("done\n".into())).unwrap();
        tx.send(RunEvent::Finished(RunOutcome::Exited { code: Some(0) })).unwrap();
        assert!(!controller.pump(&mut sink));

        assert_eq!(sink.text, "loading model\ndone\n");
        assert!(sink.time.as_deref().unwrap().starts_with("Run complete. Total Time: "));
        assert_eq!(controller.session().state, SessionState::Completed);
        assert!(sink.run_enabled);
    }

    #[test]
    fn appending_never_rewrites_earlier_text() {
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();
        let lines = ["a\n", "", "b", "c\n"];

        let mut previous = String::new();
        for line in lines {
            controller.handle_event(RunEvent::Line(line.to_string()), &mut sink);
            assert!(sink.text.starts_with(&previous));
            previous = sink.text.clone();
        }
        assert_eq!(sink.text, "a\nbc\n");
    }

    #[test]
    fn second_start_is_rejected_while_streaming() {
        let (tx, rx) = mpsc::channel();
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();
        controller.watch(rx, RunKind::Pipeline, &mut sink).unwrap();
        tx.send(RunEvent::Started(Instant::now())).unwrap();
        controller.pump(&mut sink);

        let config = RunConfig::new("/s", "/d", "/o");
        let err = controller
            .start_run(&config, &PipelineSettings::default(), &mut sink)
            .unwrap_err();
        assert_eq!(err, ControllerError::AlreadyRunning);

        let (_tx2, rx2) = mpsc::channel();
        assert_eq!(controller.watch(rx2, RunKind::Pipeline, &mut sink), Err(ControllerError::AlreadyRunning));

        // The first run is untouched
        tx.send(RunEvent::Line("still here\n".into())).unwrap();
        controller.pump(&mut sink);
        assert_eq!(sink.text, "still here\n");
        assert_eq!(controller.session().state, SessionState::Running);
    }

    #[test]
    fn a_new_run_may_start_after_completion() {
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();
        let config = RunConfig::new("", "", "/o");

        controller.start_run(&config, &PipelineSettings::default(), &mut sink).unwrap();
        controller.pump(&mut sink);
        assert!(controller
            .start_run(&config, &PipelineSettings::default(), &mut sink)
            .is_ok());
    }

    #[test]
    fn tick_formats_elapsed_and_finish_freezes_it() {
        let (tx, rx) = mpsc::channel();
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();
        controller.watch(rx, RunKind::Pipeline, &mut sink).unwrap();

        let start = Instant::now();
        controller.handle_event_at(RunEvent::Started(start), start, &mut sink);
        controller.tick_at(start + Duration::from_secs(65), &mut sink);
        assert_eq!(sink.time.as_deref(), Some("Time Elapsed: 01:05"));

        controller.tick_at(start + Duration::from_secs(3661), &mut sink);
        assert_eq!(sink.time.as_deref(), Some("Time Elapsed: 01:01:01"));

        controller.handle_event_at(
            RunEvent::Finished(RunOutcome::Exited { code: Some(0) }),
            start + Duration::from_secs(3662),
            &mut sink,
        );
        assert_eq!(sink.time.as_deref(), Some("Run complete. Total Time: 01:01:02"));

        // Ticks after completion leave the summary alone
        controller.tick_at(start + Duration::from_secs(9000), &mut sink);
        assert_eq!(sink.time.as_deref(), Some("Run complete. Total Time: 01:01:02"));
        drop(tx);
    }

    #[test]
    fn nonzero_exit_is_noted_in_the_output() {
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();

        controller.handle_event(RunEvent::Started(Instant::now()), &mut sink);
        controller.handle_event(RunEvent::Line("Traceback\n".into()), &mut sink);
        controller.handle_event(RunEvent::Finished(RunOutcome::Exited { code: Some(1) }), &mut sink);

        assert_eq!(sink.text, "Traceback\nPipeline exited with status 1\n");
        assert_eq!(controller.session().outcome(), Some(RunOutcome::Exited { code: Some(1) }));
    }

    #[test]
    fn spawn_failure_is_shown_to_the_user() {
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();

        controller.handle_event(RunEvent::SpawnFailed("cannot start python".into()), &mut sink);
        controller.handle_event(RunEvent::Finished(RunOutcome::NotStarted), &mut sink);

        assert_eq!(sink.text, "Pipeline failed to launch: cannot start python\n");
        assert_eq!(sink.time.as_deref(), Some("Run complete. Total Time: 00:00"));
    }

    #[test]
    fn install_messages_name_the_install_and_signals_read_cleanly() {
        let (tx, rx) = mpsc::channel();
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();
        controller.watch(rx, RunKind::Install, &mut sink).unwrap();

        tx.send(RunEvent::Started(Instant::now())).unwrap();
        tx.send(RunEvent::Finished(RunOutcome::Exited { code: None })).unwrap();
        controller.pump(&mut sink);
        assert_eq!(sink.text, "Dependency install was terminated by a signal\n");

        let (tx, rx) = mpsc::channel();
        controller.watch(rx, RunKind::Install, &mut sink).unwrap();
        tx.send(RunEvent::SpawnFailed("cannot start python".into())).unwrap();
        tx.send(RunEvent::Finished(RunOutcome::NotStarted)).unwrap();
        controller.pump(&mut sink);
        assert!(sink
            .text
            .ends_with("Dependency install failed to launch: cannot start python\n"));
    }

    #[test]
    fn clock_starts_when_the_worker_saw_the_process_start() {
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();
        let spawned = Instant::now();

        // Started is only handled by the UI some time after the worker sent it
        controller.handle_event_at(
            RunEvent::Started(spawned),
            spawned + Duration::from_secs(5),
            &mut sink,
        );
        assert_eq!(sink.time.as_deref(), Some("Time Elapsed: 00:05"));

        controller.handle_event_at(
            RunEvent::Finished(RunOutcome::Exited { code: Some(0) }),
            spawned + Duration::from_secs(65),
            &mut sink,
        );
        assert_eq!(sink.time.as_deref(), Some("Run complete. Total Time: 01:05"));
        assert_eq!(controller.session().elapsed(), Duration::from_secs(65));
    }

    #[test]
    fn dropped_runner_counts_as_finished() {
        let (tx, rx) = mpsc::channel();
        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();
        controller.watch(rx, RunKind::Pipeline, &mut sink).unwrap();

        tx.send(RunEvent::Started(Instant::now())).unwrap();
        drop(tx);

        assert!(!controller.pump(&mut sink));
        assert!(!controller.is_busy());
        assert_eq!(controller.session().state, SessionState::Completed);
        assert!(sink.run_enabled);
    }

    #[cfg(unix)]
    #[test]
    fn real_process_output_reaches_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("Inference_pipeline.py");
        std::fs::write(&script, "printf 'loading model\\n'\nprintf 'done\\n'\n").unwrap();

        let settings = PipelineSettings {
            interpreter: "sh".to_string(),
            ..PipelineSettings::default()
        };
        // `sh -u Inference_pipeline.py --process_data ...` runs the script with the flags as $@
        let config = RunConfig::new(dir.path().to_string_lossy(), "/d", "/o");

        let mut controller = SessionController::new();
        let mut sink = RecordingSink::default();
        controller.start_run(&config, &settings, &mut sink).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while controller.pump(&mut sink) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(sink.text, "loading model\ndone\n");
        assert_eq!(controller.session().outcome(), Some(RunOutcome::Exited { code: Some(0) }));
        assert!(sink.time.as_deref().unwrap().starts_with("Run complete."));
    }
}
