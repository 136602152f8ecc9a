//! Staged, all-or-nothing output files.
//!
//! A [`Session`] buffers every output stream in memory while a formatter runs.
//! Closing it compares each stream with the file already on disk and replaces
//! the file only when the content differs, so unchanged outputs keep their
//! timestamps. Aborting deletes every target path of the run.

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::FormatError;
use super::symbols::{SymbolTable, substitute};

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    SymbolsPopulated,
    Generating,
    Closed,
    Aborted,
}

/// What closing a session did to one target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

/// Target paths for a formatter with `defaults` file names.
///
/// Without a requested path the defaults are used as they are. A formatter
/// with several outputs, or a requested path without an extension, keeps the
/// requested stem and takes each default's extension. Otherwise the requested
/// path is used verbatim.
#[must_use]
pub fn output_paths(defaults: &[&str], requested: Option<&Path>) -> Vec<PathBuf> {
    let Some(requested) = requested else {
        return defaults.iter().map(PathBuf::from).collect();
    };
    if defaults.len() > 1 || requested.extension().is_none() {
        return defaults
            .iter()
            .map(|default| match Path::new(default).extension() {
                Some(ext) => requested.with_extension(ext),
                None => requested.with_extension(""),
            })
            .collect();
    }
    vec![requested.to_path_buf()]
}

#[derive(Debug)]
pub struct Session {
    paths: Vec<PathBuf>,
    streams: Vec<String>,
    symbols: SymbolTable,
    state: SessionState,
}

impl Session {
    /// Opens a session with one in-memory stream per target path.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>, symbols: SymbolTable) -> Self {
        let streams = vec![String::new(); paths.len()];
        Self {
            paths,
            streams,
            symbols,
            state: SessionState::Initialized,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    #[must_use]
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Applies user `NAME=value` overrides on top of the defaults.
    ///
    /// # Errors
    /// [`FormatError::BadDefine`] for a malformed override.
    pub fn populate<S: AsRef<str>>(&mut self, defines: &[S]) -> Result<(), FormatError> {
        assert_eq!(
            self.state,
            SessionState::Initialized,
            "symbols populated twice"
        );
        for define in defines {
            self.symbols.define(define.as_ref())?;
        }
        self.state = SessionState::SymbolsPopulated;
        Ok(())
    }

    /// Sets a symbol computed by the formatter. Overrides any user value.
    pub fn set_symbol(&mut self, name: &str, value: impl Into<String>) {
        self.enter_generating();
        self.symbols.set(name, value);
    }

    /// Appends `template` to `stream` after symbol substitution.
    ///
    /// # Errors
    /// Any substitution failure.
    pub fn write(&mut self, stream: usize, template: &str) -> Result<(), FormatError> {
        let text = substitute(template, &self.symbols)?;
        self.write_raw(stream, &text);
        Ok(())
    }

    /// Appends `text` to `stream` as is.
    pub fn write_raw(&mut self, stream: usize, text: &str) {
        self.enter_generating();
        self.streams[stream].push_str(text);
    }

    /// Commits every stream to its path.
    ///
    /// On failure every target path is removed, as for [`Session::abort`],
    /// and the first error is returned.
    ///
    /// # Errors
    /// [`FormatError::Io`] when a file cannot be written.
    pub fn close(mut self) -> Result<Vec<(PathBuf, WriteOutcome)>, FormatError> {
        let mut outcomes = Vec::with_capacity(self.paths.len());
        let mut failure = None;
        for (path, content) in self.paths.iter().zip(&self.streams) {
            match commit(path, content) {
                Ok(outcome) => outcomes.push((path.clone(), outcome)),
                Err(source) => {
                    failure = Some(FormatError::Io {
                        path: path.clone(),
                        source,
                    });
                    break;
                }
            }
        }
        if let Some(error) = failure {
            self.remove_all();
            return Err(error);
        }
        self.state = SessionState::Closed;
        Ok(outcomes)
    }

    /// Deletes every target path. Returns the paths that were removed.
    pub fn abort(mut self) -> Vec<PathBuf> {
        self.remove_all()
    }

    fn remove_all(&mut self) -> Vec<PathBuf> {
        self.state = SessionState::Aborted;
        let mut removed = Vec::new();
        for path in &self.paths {
            if !path.exists() {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => {
                    info!(path = %path.display(), "deleted file");
                    removed.push(path.clone());
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to delete file"),
            }
        }
        removed
    }

    fn enter_generating(&mut self) {
        assert!(
            matches!(
                self.state,
                SessionState::SymbolsPopulated | SessionState::Generating
            ),
            "session is {:?}, not ready for output",
            self.state
        );
        self.state = SessionState::Generating;
    }
}

fn commit(path: &Path, content: &str) -> io::Result<WriteOutcome> {
    if fs::read_to_string(path).is_ok_and(|existing| existing == content) {
        info!(path = %path.display(), "file not written as unchanged");
        return Ok(WriteOutcome::Unchanged);
    }
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(content.as_bytes())?;
    staged.persist(path).map_err(|e| e.error)?;
    info!(path = %path.display(), "wrote file");
    Ok(WriteOutcome::Written)
}
