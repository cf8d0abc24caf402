/// Launch configuration
///
/// Everything needed to start a GDB session. Loadable from JSON; every
/// field has a default so a config file only names what it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::communication::DEFAULT_MAX_RECORD_BYTES;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Debugger executable
    pub gdb_path: String,
    /// Extra command line options passed before the program
    pub extra_options: Vec<String>,
    pub program: Option<String>,
    pub program_args: Vec<String>,
    pub working_dir: Option<String>,
    /// Source search directories, one `-d` each
    pub source_dirs: Vec<String>,
    /// Terminal for the inferior's I/O
    pub tty: Option<String>,
    /// Give GDB a pseudo-terminal as stdin instead of a pipe
    pub use_pty: bool,
    /// Commands queued right after launch
    pub init_commands: Vec<String>,
    /// Commands allowed in flight at once
    pub max_in_flight: usize,
    pub max_record_bytes: usize,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            extra_options: Vec::new(),
            program: None,
            program_args: Vec::new(),
            working_dir: None,
            source_dirs: Vec::new(),
            tty: None,
            use_pty: true,
            init_commands: vec!["set breakpoint pending auto".to_string()],
            max_in_flight: 1,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

impl LaunchConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: LaunchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::debug!("Loading launch config from {}", path.display());
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gdb_path.trim().is_empty() {
            return Err(ConfigError::Invalid("gdb_path is empty".into()));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max_in_flight must be at least 1".into()));
        }
        if self.max_record_bytes == 0 {
            return Err(ConfigError::Invalid("max_record_bytes must be at least 1".into()));
        }
        if self.program.is_none() && !self.program_args.is_empty() {
            return Err(ConfigError::Invalid("program_args given without a program".into()));
        }
        Ok(())
    }

    /// The debugger's argument vector, without the executable itself
    pub fn command_line(&self) -> Vec<String> {
        let mut args = vec!["--interpreter=mi2".to_string()];
        args.extend(self.extra_options.iter().cloned());
        if let Some(tty) = &self.tty {
            args.push(format!("--tty={}", tty));
        }
        if let Some(dir) = &self.working_dir {
            args.push(format!("--cd={}", dir));
        }
        for dir in &self.source_dirs {
            args.push("-d".to_string());
            args.push(dir.clone());
        }
        if let Some(program) = &self.program {
            args.push("--args".to_string());
            args.push(program.clone());
            args.extend(self.program_args.iter().cloned());
        }
        args
    }
}
