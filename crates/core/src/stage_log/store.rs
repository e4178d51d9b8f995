use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::LogRecord;

#[derive(Debug, Error)]
pub enum LogSinkError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Destination for stage log records.
///
/// Only the [`LogWriter`](super::LogWriter) calls into a store, one record
/// at a time.
pub trait LogStore: Send {
    fn append(&mut self, record: &LogRecord) -> Result<(), LogSinkError>;

    fn flush(&mut self) -> Result<(), LogSinkError> {
        Ok(())
    }
}

type FileNamer = Box<dyn Fn(&str) -> String + Send>;

/// Writes JSON lines into one file per stage under a directory.
///
/// The file name for a stage comes from the caller-supplied namer. Files are
/// opened lazily in append mode.
pub struct DirectoryStore {
    dir: PathBuf,
    namer: FileNamer,
    files: HashMap<String, (PathBuf, BufWriter<File>)>,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>, namer: impl Fn(&str) -> String + Send + 'static) -> Self {
        Self {
            dir: dir.into(),
            namer: Box::new(namer),
            files: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the given stage's records are written to.
    pub fn path_for(&self, stage: &str) -> PathBuf {
        self.dir.join((self.namer)(stage))
    }

    fn writer_for(&mut self, stage: &str) -> Result<&mut (PathBuf, BufWriter<File>), LogSinkError> {
        if !self.files.contains_key(stage) {
            let path = self.path_for(stage);
            std::fs::create_dir_all(&self.dir).map_err(|source| LogSinkError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| LogSinkError::Io {
                    path: path.clone(),
                    source,
                })?;
            self.files
                .insert(stage.to_string(), (path, BufWriter::new(file)));
        }
        self.files
            .get_mut(stage)
            .ok_or_else(|| LogSinkError::Serialization(format!("no writer for stage {stage}")))
    }
}

impl LogStore for DirectoryStore {
    fn append(&mut self, record: &LogRecord) -> Result<(), LogSinkError> {
        let line = serde_json::to_string(record)
            .map_err(|e| LogSinkError::Serialization(e.to_string()))?;
        let (path, writer) = self.writer_for(&record.stage)?;
        writeln!(writer, "{line}").map_err(|source| LogSinkError::Io {
            path: path.clone(),
            source,
        })
    }

    fn flush(&mut self) -> Result<(), LogSinkError> {
        for (path, writer) in self.files.values_mut() {
            writer.flush().map_err(|source| LogSinkError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
