// src/exec/execution_log.rs

use crate::job::{ExecutionLog, LogEvent, LogEventLevel};
use crate::types::ExecutionLogMode;

/// Collects what a function reports while one item executes.
///
/// Warning and error indicators are always kept. Individual events are only
/// retained in [`ExecutionLogMode::Full`].
#[derive(Debug)]
pub struct ItemLog {
    mode: ExecutionLogMode,
    log: ExecutionLog,
}

impl ItemLog {
    pub fn new(mode: ExecutionLogMode) -> Self {
        Self {
            mode,
            log: ExecutionLog::default(),
        }
    }

    pub fn mode(&self) -> ExecutionLogMode {
        self.mode
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.record(LogEventLevel::Debug, message.into());
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(LogEventLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(LogEventLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(LogEventLevel::Error, message.into());
    }

    fn record(&mut self, level: LogEventLevel, message: String) {
        match level {
            LogEventLevel::Warn => self.log.has_warnings = true,
            LogEventLevel::Error => self.log.has_errors = true,
            LogEventLevel::Debug | LogEventLevel::Info => {}
        }
        if self.mode == ExecutionLogMode::Full {
            self.log.events.push(LogEvent { level, message });
        }
    }

    pub fn into_log(self) -> ExecutionLog {
        self.log
    }
}
