//! Logging setup: `env_logger` output plus a fan-out to in-process observers.
//!
//! Observers (a log pane, a test) call [`subscribe`] and receive every record
//! that passes the filter as a [`LogLine`]. Dropping the [`LogSubscription`]
//! deregisters it.

use crate::config::LoggingConfig;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Registered observer channels.
pub struct LogObservers {
    next_id: AtomicU64,
    senders: Mutex<Vec<(u64, UnboundedSender<LogLine>)>>,
}

static OBSERVERS: LogObservers = LogObservers::new();

impl Default for LogObservers {
    fn default() -> Self {
        Self::new()
    }
}

impl LogObservers {
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            senders: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, UnboundedSender<LogLine>)>> {
        self.senders.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn subscribe(&self) -> LogSubscription<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push((id, tx));
        LogSubscription {
            id,
            rx,
            observers: self,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, line: &LogLine) {
        self.lock().retain(|(_, tx)| tx.send(line.clone()).is_ok());
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(other, _)| *other != id);
    }
}

/// Receiving end of one observer; deregisters on drop.
pub struct LogSubscription<'a> {
    id: u64,
    rx: UnboundedReceiver<LogLine>,
    observers: &'a LogObservers,
}

impl LogSubscription<'_> {
    pub fn try_recv(&mut self) -> Option<LogLine> {
        self.rx.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }
}

impl Drop for LogSubscription<'_> {
    fn drop(&mut self) {
        self.observers.remove(self.id);
    }
}

/// Subscribes to the process-wide log stream.
pub fn subscribe() -> LogSubscription<'static> {
    OBSERVERS.subscribe()
}

struct FanOut<'a> {
    inner: env_logger::Logger,
    observers: &'a LogObservers,
}

impl Log for FanOut<'_> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);
        self.observers.notify(&LogLine {
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        });
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn build_logger(config: &LoggingConfig) -> env_logger::Logger {
    let level = config
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .build()
}

/// Installs the global logger. `RUST_LOG` overrides the configured level.
pub fn init(config: &LoggingConfig) -> Result<(), SetLoggerError> {
    let inner = build_logger(config);
    let max = inner.filter();
    log::set_boxed_logger(Box::new(FanOut {
        inner,
        observers: &OBSERVERS,
    }))?;
    log::set_max_level(max);
    Ok(())
}
