use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Plain-text log for one subject's workflow run.
///
/// Each line is written and flushed immediately so the file can be uploaded
/// at any point, including after a failure.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    /// Create (or append to) the log file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        tracing::info!(run_log = %self.path.display(), "{}", message.as_ref());
        self.write_line("INFO", message.as_ref());
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        tracing::warn!(run_log = %self.path.display(), "{}", message.as_ref());
        self.write_line("WARN", message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        tracing::error!(run_log = %self.path.display(), "{}", message.as_ref());
        self.write_line("ERROR", message.as_ref());
    }

    /// Append captured tool output verbatim, one indented line per line.
    pub fn output(&mut self, label: &str, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.write_line("INFO", &format!("{} output:", label));
        for line in text.lines() {
            let _ = writeln!(self.file, "    {}", line);
        }
        let _ = self.file.flush();
    }

    fn write_line(&mut self, level: &str, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        // A log that cannot be written must not abort the run it describes
        if let Err(err) = writeln!(self.file, "{} {:<5} {}", stamp, level, message)
            .and_then(|_| self.file.flush())
        {
            tracing::warn!(path = %self.path.display(), error = %err, "Run log write failed");
        }
    }
}
