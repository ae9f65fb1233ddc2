use crate::error::{Result, SweepError};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::Level;

#[derive(Debug)]
pub struct Reporter {
    prefix: String,
    log: Option<Mutex<File>>,
    warnings: AtomicUsize,
}

impl Reporter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            log: None,
            warnings: AtomicUsize::new(0),
        }
    }

    pub fn with_log_file(mut self, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SweepError::io(path, e))?;
        self.log = Some(Mutex::new(file));
        Ok(self)
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.emit(Level::DEBUG, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(Level::INFO, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
        self.emit(Level::WARN, message.as_ref());
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn finish(self, summary: impl AsRef<str>) {
        self.emit(Level::INFO, summary.as_ref());
        if let Some(log) = &self.log {
            if let Ok(mut file) = log.lock() {
                let _ = file.flush();
            }
        }
    }

    fn emit(&self, level: Level, message: &str) {
        if level == Level::DEBUG {
            tracing::debug!(prefix = %self.prefix, "{}", message);
        } else if level == Level::WARN {
            tracing::warn!(prefix = %self.prefix, "{}", message);
        } else {
            tracing::info!(prefix = %self.prefix, "{}", message);
        }
        if let Some(log) = &self.log {
            if let Ok(mut file) = log.lock() {
                let _ = writeln!(
                    file,
                    "{} {} {} {}",
                    Utc::now().to_rfc3339(),
                    level,
                    self.prefix,
                    message
                );
            }
        }
    }
}
