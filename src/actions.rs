use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why the help text could not be shown
#[derive(Debug, Error)]
pub enum HelpError {
    #[error("Help file {0} was not found")]
    NotFound(PathBuf),
    #[error("Cannot read help file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Candidate locations for the help file, in lookup order
pub fn help_candidates(help_file: &str) -> Vec<PathBuf> {
    let path = Path::new(help_file);
    if path.is_absolute() {
        return vec![path.to_path_buf()];
    }

    let mut candidates = vec![path.to_path_buf()];
    if let Some(exe_dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(path));
    }
    candidates
}

/// Read the help text from the first candidate location that exists
pub fn load_help_text(help_file: &str) -> Result<String, HelpError> {
    let candidates = help_candidates(help_file);

    for path in &candidates {
        match fs::read_to_string(path) {
            Ok(text) => return Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => {
                return Err(HelpError::Read {
                    path: path.clone(),
                    source,
                })
            }
        }
    }

    Err(HelpError::NotFound(PathBuf::from(help_file)))
}
