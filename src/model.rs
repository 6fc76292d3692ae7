use crate::config::PipelineSettings;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The three folders a user has to pick before a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathField {
    ScriptDir,
    DataDir,
    OutputDir,
}

impl PathField {
    pub const ALL: [PathField; 3] = [PathField::ScriptDir, PathField::DataDir, PathField::OutputDir];

    /// Label shown next to the folder entry
    pub fn label(&self) -> &'static str {
        match self {
            PathField::ScriptDir => "Script Folder: ",
            PathField::DataDir => "Sound File Folder: ",
            PathField::OutputDir => "Output Folder: ",
        }
    }

    /// Message reported when the field is left empty
    pub fn missing_message(&self) -> &'static str {
        match self {
            PathField::ScriptDir => "Please select a script directory before running.",
            PathField::DataDir => "Please select a data file directory before running.",
            PathField::OutputDir => "Please select a spectrogram file directory before running.",
        }
    }
}

impl fmt::Display for PathField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PathField::ScriptDir => "script directory",
            PathField::DataDir => "data directory",
            PathField::OutputDir => "output directory",
        };
        f.write_str(name)
    }
}

/// Folders for one run, taken from the UI when Run is pressed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    pub script_dir: String,
    pub data_dir: String,
    pub output_dir: String,
}

impl RunConfig {
    pub fn new(
        script_dir: impl Into<String>,
        data_dir: impl Into<String>,
        output_dir: impl Into<String>,
    ) -> Self {
        Self {
            script_dir: script_dir.into(),
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn get(&self, field: PathField) -> &str {
        match field {
            PathField::ScriptDir => &self.script_dir,
            PathField::DataDir => &self.data_dir,
            PathField::OutputDir => &self.output_dir,
        }
    }

    /// Empty fields, in display order
    pub fn missing_fields(&self) -> Vec<PathField> {
        PathField::ALL
            .into_iter()
            .filter(|field| self.get(*field).is_empty())
            .collect()
    }
}

/// An external command: program, ordered arguments and working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
        }
    }

    /// Detection pipeline run over `config`, executed inside the script folder
    pub fn pipeline(config: &RunConfig, settings: &PipelineSettings) -> Self {
        let args = [
            "-u",
            settings.script.as_str(),
            "--process_data",
            "--make_predictions",
            "--model_0",
            settings.model_0.as_str(),
            "--model_1",
            settings.model_1.as_str(),
            "--data_dir",
            config.data_dir.as_str(),
            "--spect_out",
            config.output_dir.as_str(),
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();

        Self::new(settings.interpreter.clone(), args, &config.script_dir)
    }

    /// `pip install -r <requirements>` for the scripts in `script_dir`
    pub fn install_requirements(script_dir: &str, settings: &PipelineSettings) -> Self {
        let requirements = Path::new(&settings.requirements);
        let requirements = if requirements.is_absolute() {
            requirements.to_path_buf()
        } else {
            Path::new(script_dir).join(requirements)
        };

        let args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "-r".to_string(),
            requirements.to_string_lossy().to_string(),
        ];

        Self::new(settings.interpreter.clone(), args, script_dir)
    }

    /// Shell-like rendering for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("\"{}\"", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Format elapsed time as `MM:SS`, or `HH:MM:SS` from one hour on
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours == 0 {
        format!("{:02}:{:02}", minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}
