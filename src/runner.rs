use crate::config::PipelineSettings;
use crate::model::{Invocation, PathField, RunConfig};
use std::io::{self, BufRead, BufReader, PipeReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No process was started (missing path or spawn failure)
    NotStarted,
    /// Output stream closed and the process was reaped; `None` if killed by a signal
    Exited { code: Option<i32> },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Exited { code: Some(0) })
    }
}

/// Notifications sent from the worker to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A required folder was left empty
    MissingPath(PathField),
    /// The process is up and its output is about to be read; carries the spawn time
    Started(Instant),
    /// One line of merged stdout/stderr, terminator included
    Line(String),
    /// The process could not be created
    SpawnFailed(String),
    /// Always the last event of a run
    Finished(RunOutcome),
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("cannot create output pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Start the detector pipeline for `config` on a background thread
pub fn start_pipeline(config: &RunConfig, settings: &PipelineSettings) -> Receiver<RunEvent> {
    start(config.missing_fields(), Invocation::pipeline(config, settings))
}

/// Install the pipeline's Python requirements on a background thread
pub fn start_install(script_dir: &str, settings: &PipelineSettings) -> Receiver<RunEvent> {
    let missing = if script_dir.is_empty() {
        vec![PathField::ScriptDir]
    } else {
        Vec::new()
    };
    start(missing, Invocation::install_requirements(script_dir, settings))
}

/// Run `invocation` in a background thread and return its event stream.
///
/// When `missing` is non-empty nothing is spawned: the missing fields and a
/// `Finished(NotStarted)` are queued before this returns.
pub fn start(missing: Vec<PathField>, invocation: Invocation) -> Receiver<RunEvent> {
    let (tx, rx) = mpsc::channel();

    if !missing.is_empty() {
        for field in missing {
            warn!("Missing {}: {}", field, field.missing_message());
            let _ = tx.send(RunEvent::MissingPath(field));
        }
        let _ = tx.send(RunEvent::Finished(RunOutcome::NotStarted));
        return rx;
    }

    let worker_tx = tx.clone();
    let spawned = thread::Builder::new()
        .name("pipeline-runner".to_string())
        .spawn(move || {
            run_invocation(&invocation, |event| send(&worker_tx, event));
        });

    if let Err(e) = spawned {
        error!("Cannot start runner thread: {}", e);
        let _ = tx.send(RunEvent::SpawnFailed(e.to_string()));
        let _ = tx.send(RunEvent::Finished(RunOutcome::NotStarted));
    }

    rx
}

fn send(tx: &Sender<RunEvent>, event: RunEvent) {
    // A closed receiver only means nobody is watching; keep draining the child.
    let _ = tx.send(event);
}

/// Run `invocation` to the end of its output, reporting every event to `on_event`.
///
/// Blocks the calling thread until the merged output stream closes.
pub fn run_invocation(invocation: &Invocation, mut on_event: impl FnMut(RunEvent)) -> RunOutcome {
    info!("Running {} in {}", invocation.command_line(), invocation.cwd.display());

    let (mut child, reader) = match spawn_merged(invocation) {
        Ok(spawned) => spawned,
        Err(e) => {
            error!("{}", e);
            on_event(RunEvent::SpawnFailed(e.to_string()));
            on_event(RunEvent::Finished(RunOutcome::NotStarted));
            return RunOutcome::NotStarted;
        }
    };

    on_event(RunEvent::Started(Instant::now()));
    relay_lines(reader, &mut on_event);

    let outcome = match child.wait() {
        Ok(status) => {
            info!("{} exited with {}", invocation.program, status);
            RunOutcome::Exited { code: status.code() }
        }
        Err(e) => {
            warn!("Cannot reap {}: {}", invocation.program, e);
            RunOutcome::Exited { code: None }
        }
    };

    on_event(RunEvent::Finished(outcome));
    outcome
}

/// Spawn with stdout and stderr sharing one pipe
fn spawn_merged(invocation: &Invocation) -> Result<(Child, PipeReader), RunError> {
    let (reader, writer) = io::pipe().map_err(RunError::Pipe)?;
    let err_writer = writer.try_clone().map_err(RunError::Pipe)?;

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .current_dir(&invocation.cwd)
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(err_writer);

    let child = command.spawn().map_err(|source| RunError::Spawn {
        program: invocation.program.clone(),
        source,
    })?;

    // The command still owns our copies of the write end; the reader only
    // sees end-of-stream once they are gone.
    drop(command);

    Ok((child, reader))
}

/// Forward each `\n`-terminated chunk of `reader` as a `Line`, in order
fn relay_lines(reader: impl io::Read, on_event: &mut impl FnMut(RunEvent)) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => on_event(RunEvent::Line(String::from_utf8_lossy(&buf).into_owned())),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Output stream ended early: {}", e);
                break;
            }
        }
    }
}
