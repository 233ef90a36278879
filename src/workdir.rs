//! Local working directory for run keys, result artifacts, and the shared
//! diagnostic log.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::exec::CommandOutput;

/// File name of the diagnostic log that accumulates subprocess output.
pub const DIAGNOSTIC_LOG_NAME: &str = "sidescan-diagnostics.log";

/// Errors raised by work directory operations.
#[derive(Debug, Error)]
pub enum WorkDirError {
    /// Raised when a file operation fails.
    #[error("{action} {path}: {message}")]
    Io {
        /// Operation that failed (for example `write`).
        action: &'static str,
        /// Path involved in the operation.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Capability handle on the run's working directory.
#[derive(Debug)]
pub struct WorkDir {
    root: Utf8PathBuf,
    dir: Dir,
    diagnostics: Mutex<()>,
}

impl WorkDir {
    /// Opens `root`, creating it when it does not yet exist.
    ///
    /// # Errors
    ///
    /// Returns [`WorkDirError::Io`] when the directory cannot be created or
    /// opened.
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, WorkDirError> {
        let root_path = root.into();
        Dir::create_ambient_dir_all(&root_path, ambient_authority())
            .map_err(|err| io_error("create", &root_path, &err))?;
        let dir = Dir::open_ambient_dir(&root_path, ambient_authority())
            .map_err(|err| io_error("open", &root_path, &err))?;
        Ok(Self {
            root: root_path,
            dir,
            diagnostics: Mutex::new(()),
        })
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the full path of `name` inside the directory.
    #[must_use]
    pub fn path_of(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    /// Creates or truncates `name` with `contents`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkDirError::Io`] when the write fails.
    pub fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> Result<(), WorkDirError> {
        self.dir
            .write(name, contents)
            .map_err(|err| io_error("write", &self.path_of(name), &err))
    }

    /// Appends `contents` to `name`, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns [`WorkDirError::Io`] when the file cannot be opened or written.
    pub fn append(&self, name: &str, contents: &[u8]) -> Result<(), WorkDirError> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        let mut file = self
            .dir
            .open_with(name, &options)
            .map_err(|err| io_error("open", &self.path_of(name), &err))?;
        file.write_all(contents)
            .map_err(|err| io_error("append to", &self.path_of(name), &err))
    }

    /// Reads `name` into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns [`WorkDirError::Io`] when the file is missing or unreadable.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, WorkDirError> {
        self.dir
            .read(name)
            .map_err(|err| io_error("read", &self.path_of(name), &err))
    }

    /// Reads `name` as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`WorkDirError::Io`] when the file is missing, unreadable, or
    /// not valid UTF-8.
    pub fn read_to_string(&self, name: &str) -> Result<String, WorkDirError> {
        self.dir
            .read_to_string(name)
            .map_err(|err| io_error("read", &self.path_of(name), &err))
    }

    /// Removes `name`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkDirError::Io`] when the removal fails.
    pub fn remove(&self, name: &str) -> Result<(), WorkDirError> {
        self.dir
            .remove_file(name)
            .map_err(|err| io_error("remove", &self.path_of(name), &err))
    }

    /// Returns `true` when `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.dir.try_exists(name).unwrap_or(false)
    }

    /// Appends a subprocess's captured output to the diagnostic log.
    ///
    /// Diagnostics are best effort: a failing write is reported through
    /// `tracing` and otherwise ignored.
    pub fn record_diagnostics(&self, label: &str, output: &CommandOutput) {
        let status = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        let mut entry = format!("==> {label} (exit status {status})\n");
        for stream in [&output.stdout, &output.stderr] {
            if !stream.is_empty() {
                entry.push_str(stream);
                if !stream.ends_with('\n') {
                    entry.push('\n');
                }
            }
        }

        let _guard = self
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = self.append(DIAGNOSTIC_LOG_NAME, entry.as_bytes()) {
            tracing::warn!(error = %err, "failed to write diagnostic log");
        }
    }
}

fn io_error(action: &'static str, path: &Utf8Path, err: &io::Error) -> WorkDirError {
    WorkDirError::Io {
        action,
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
