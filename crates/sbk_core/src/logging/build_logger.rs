//! Per-build logger with file and callback output.
//!
//! Each build gets its own logger that:
//! - Writes to a dedicated log file
//! - Sends lines to a GUI callback (if provided)
//! - Mirrors lines into `tracing`
//! - Maintains a tail buffer for error diagnosis
//!
//! The logger is also a [`MessageSink`], so it can be handed straight to a
//! supervisor and every status message lands in the build log.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

use super::sink::MessageSink;
use super::types::{GuiLogCallback, LogConfig, LogLevel, MessagePrefix};

/// Per-build logger with dual output (file + GUI).
pub struct BuildLogger {
    /// Build name, usually the songbook basename.
    build_name: String,
    /// Path to log file (`None` for in-memory loggers).
    log_path: Option<PathBuf>,
    file_writer: Mutex<Option<BufWriter<File>>>,
    gui_callback: Mutex<Option<GuiLogCallback>>,
    config: LogConfig,
    /// Recent lines, bounded by `config.error_tail`.
    tail_buffer: Mutex<VecDeque<String>>,
}

impl BuildLogger {
    /// Create a new build logger writing to `<log_dir>/<build_name>.log`.
    ///
    /// # Arguments
    /// * `build_name` - Name of the build (used in log filename)
    /// * `log_dir` - Directory to write log file to
    /// * `config` - Logging configuration
    /// * `gui_callback` - Optional callback for GUI output
    pub fn new(
        build_name: impl Into<String>,
        log_dir: impl AsRef<Path>,
        config: LogConfig,
        gui_callback: Option<GuiLogCallback>,
    ) -> std::io::Result<Self> {
        let build_name = build_name.into();
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)?;

        let log_path = log_dir.join(format!("{}.log", sanitize_filename(&build_name)));
        let file = File::create(&log_path)?;

        let mut logger = Self::in_memory(build_name, config, gui_callback);
        logger.log_path = Some(log_path);
        *logger.file_writer.get_mut() = Some(BufWriter::new(file));
        Ok(logger)
    }

    /// Create a logger with no backing file.
    pub fn in_memory(
        build_name: impl Into<String>,
        config: LogConfig,
        gui_callback: Option<GuiLogCallback>,
    ) -> Self {
        let capacity = config.error_tail;
        Self {
            build_name: build_name.into(),
            log_path: None,
            file_writer: Mutex::new(None),
            gui_callback: Mutex::new(gui_callback),
            config,
            tail_buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn build_name(&self) -> &str {
        &self.build_name
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Log a message at the specified level.
    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.config.level {
            return;
        }
        if self.config.mirror_to_tracing {
            mirror(level, &self.build_name, message);
        }
        self.push_tail(message);
        self.output(&self.format_message(message));
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, &MessagePrefix::Debug.format(message));
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, &MessagePrefix::Warning.format(message));
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, &MessagePrefix::Error.format(message));
    }

    /// Log a phase marker.
    pub fn phase(&self, phase_name: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Phase.format(phase_name));
    }

    pub fn success(&self, message: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Success.format(message));
    }

    /// Replay the tail buffer (typically after a failure).
    pub fn show_tail(&self, header: &str) {
        let lines = self.get_tail();
        if lines.is_empty() {
            return;
        }

        self.output(&self.format_message(&format!("[{}/tail]", header)));
        for line in &lines {
            self.output(&self.format_message(line));
        }
    }

    pub fn clear_tail(&self) {
        self.tail_buffer.lock().clear();
    }

    /// Get the current tail buffer contents.
    pub fn get_tail(&self) -> Vec<String> {
        self.tail_buffer.lock().iter().cloned().collect()
    }

    pub fn flush(&self) {
        if let Some(ref mut writer) = *self.file_writer.lock() {
            let _ = writer.flush();
        }
    }

    /// Close the log file. Later messages still reach the callback.
    pub fn close(&self) {
        self.flush();
        *self.file_writer.lock() = None;
    }

    fn push_tail(&self, line: &str) {
        if self.config.error_tail == 0 {
            return;
        }
        let mut buffer = self.tail_buffer.lock();
        if buffer.len() >= self.config.error_tail {
            buffer.pop_front();
        }
        buffer.push_back(line.to_string());
    }

    fn format_message(&self, message: &str) -> String {
        if self.config.show_timestamps {
            let timestamp = Local::now().format("%H:%M:%S");
            format!("[{}] {}", timestamp, message)
        } else {
            message.to_string()
        }
    }

    fn output(&self, formatted: &str) {
        if let Some(ref mut writer) = *self.file_writer.lock() {
            let _ = writeln!(writer, "{}", formatted);
        }

        if let Some(ref callback) = *self.gui_callback.lock() {
            callback(formatted);
        }
    }
}

impl MessageSink for BuildLogger {
    fn message(&self, text: &str) {
        self.info(text);
        // Status lines are rare; keep the file current for anyone tailing it.
        self.flush();
    }
}

impl Drop for BuildLogger {
    fn drop(&mut self) {
        self.close();
    }
}

fn mirror(level: LogLevel, build_name: &str, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(build = build_name, "{}", message),
        LogLevel::Debug => tracing::debug!(build = build_name, "{}", message),
        LogLevel::Info => tracing::info!(build = build_name, "{}", message),
        LogLevel::Warn => tracing::warn!(build = build_name, "{}", message),
        LogLevel::Error => tracing::error!(build = build_name, "{}", message),
    }
}

/// Sanitize a string to be safe for use as a filename.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Builder for creating a `BuildLogger` with a fluent API.
pub struct BuildLoggerBuilder {
    build_name: String,
    log_dir: Option<PathBuf>,
    config: LogConfig,
    gui_callback: Option<GuiLogCallback>,
}

impl BuildLoggerBuilder {
    pub fn new(build_name: impl Into<String>) -> Self {
        Self {
            build_name: build_name.into(),
            log_dir: None,
            config: LogConfig::default(),
            gui_callback: None,
        }
    }

    /// Write the log file into this directory.
    pub fn log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn gui_callback(mut self, callback: GuiLogCallback) -> Self {
        self.gui_callback = Some(callback);
        self
    }

    /// Build the logger. Without a log directory the logger is in-memory.
    pub fn build(self) -> std::io::Result<BuildLogger> {
        match self.log_dir {
            Some(dir) => BuildLogger::new(self.build_name, dir, self.config, self.gui_callback),
            None => Ok(BuildLogger::in_memory(
                self.build_name,
                self.config,
                self.gui_callback,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn creates_log_file() {
        let dir = tempdir().unwrap();
        let logger = BuildLogger::new("mybook", dir.path(), LogConfig::plain(), None).unwrap();

        let path = logger.log_path().unwrap();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with("mybook.log"));
    }

    #[test]
    fn sink_messages_reach_file() {
        let dir = tempdir().unwrap();
        let logger = BuildLogger::new("mybook", dir.path(), LogConfig::plain(), None).unwrap();

        logger.message("starting tex");

        let content = fs::read_to_string(logger.log_path().unwrap()).unwrap();
        assert_eq!(content, "starting tex\n");
    }

    #[test]
    fn calls_gui_callback() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();
        let callback: GuiLogCallback = Box::new(move |_msg| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let logger = BuildLogger::in_memory("mybook", LogConfig::plain(), Some(callback));
        logger.info("Message 1");
        logger.message("Message 2");

        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn level_filter_drops_debug() {
        let logger = BuildLogger::in_memory("mybook", LogConfig::plain(), None);

        logger.debug("hidden");
        logger.warn("shown");

        assert_eq!(logger.get_tail(), vec!["[WARNING] shown"]);
    }

    #[test]
    fn tail_buffer_maintains_limit() {
        let mut config = LogConfig::plain();
        config.error_tail = 5;
        let logger = BuildLogger::in_memory("mybook", config, None);

        for i in 0..10 {
            logger.info(&format!("Line {}", i));
        }

        let tail = logger.get_tail();
        assert_eq!(tail.len(), 5);
        assert_eq!(tail[0], "Line 5");
        assert_eq!(tail[4], "Line 9");
    }

    #[test]
    fn builder_without_dir_is_in_memory() {
        let logger = BuildLoggerBuilder::new("mybook")
            .config(LogConfig::plain())
            .level(LogLevel::Debug)
            .build()
            .unwrap();

        assert!(logger.log_path().is_none());
        logger.debug("visible");
        assert_eq!(logger.get_tail().len(), 1);
    }

    #[test]
    fn sanitizes_filename() {
        assert_eq!(sanitize_filename("normal_name"), "normal_name");
        assert_eq!(sanitize_filename("has/slash"), "has_slash");
        assert_eq!(sanitize_filename("a<b>c"), "a_b_c");
    }
}
