//! Per-run log sink.
//!
//! A [`LogSink`] receives every tracing event emitted while it is installed
//! (see [`LogSink::scope`]). Each event is appended once to the persistent log
//! file and offered, without blocking, to every subscribed observer. An
//! observer whose bounded queue is full misses that event and the sink's
//! dropped counter is incremented. Events keep reaching whatever subscriber
//! was current when the scope was entered, filtered by that subscriber.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Dispatch, Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

pub use groundwork_schema::DEFAULT_OBSERVER_CAPACITY;

/// One log event as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>5} {}: {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.level,
            self.target,
            self.message
        )?;
        for (key, value) in &self.fields {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

struct Inner {
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
    observers: Mutex<Vec<SyncSender<LogRecord>>>,
    capacity: usize,
    written: AtomicU64,
    failed_writes: AtomicU64,
    dropped: AtomicU64,
}

/// Shared handle; clones feed the same file and observers.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Inner>,
    max_level: LevelFilter,
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("path", &self.inner.path)
            .field("capacity", &self.inner.capacity)
            .field("dropped", &self.dropped_count())
            .field("failed_writes", &self.failed_write_count())
            .finish_non_exhaustive()
    }
}

impl LogSink {
    fn build(path: Option<PathBuf>, file: Option<File>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                file: Mutex::new(file),
                observers: Mutex::new(Vec::new()),
                capacity: capacity.max(1),
                written: AtomicU64::new(0),
                failed_writes: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            max_level: LevelFilter::DEBUG,
        }
    }

    /// Open (append, create) the log file at `path`. Observer queues hold
    /// `capacity` events each.
    pub fn open(path: &Path, capacity: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::build(Some(path.to_path_buf()), Some(file), capacity))
    }

    /// A sink without a backing file; events only reach observers.
    pub fn detached(capacity: usize) -> Self {
        Self::build(None, None, capacity)
    }

    /// Most verbose level recorded. Defaults to `DEBUG`.
    #[must_use]
    pub fn with_max_level(mut self, level: LevelFilter) -> Self {
        self.max_level = level;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Register an observer. Events published after this call are offered
    /// to the returned receiver.
    pub fn subscribe(&self) -> Receiver<LogRecord> {
        let (tx, rx) = mpsc::sync_channel(self.inner.capacity);
        if let Ok(mut observers) = self.inner.observers.lock() {
            observers.push(tx);
        }
        rx
    }

    /// Events that some observer missed because its queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Events appended to the log file.
    pub fn written_count(&self) -> u64 {
        self.inner.written.load(Ordering::Relaxed)
    }

    /// Events that could not be appended to the log file.
    pub fn failed_write_count(&self) -> u64 {
        self.inner.failed_writes.load(Ordering::Relaxed)
    }

    pub fn flush(&self) -> io::Result<()> {
        match self.inner.file.lock() {
            Ok(mut file) => file.as_mut().map_or(Ok(()), Write::flush),
            Err(_) => Err(io::Error::other("log file mutex poisoned")),
        }
    }

    /// Record one event: file first, then every observer.
    pub fn publish(&self, record: &LogRecord) {
        // Reporting through tracing here would re-enter this sink.
        let persisted = match self.inner.file.lock() {
            Ok(mut file) => file
                .as_mut()
                .map(|file| writeln!(file, "{record}").is_ok()),
            Err(_) => Some(false),
        };
        match persisted {
            Some(true) => {
                self.inner.written.fetch_add(1, Ordering::Relaxed);
            }
            Some(false) => {
                self.inner.failed_writes.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }

        let Ok(mut observers) = self.inner.observers.lock() else {
            return;
        };
        observers.retain(|tx| match tx.try_send(record.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Layer feeding this sink, for composing with other subscribers.
    pub fn layer(&self) -> SinkLayer {
        SinkLayer { sink: self.clone() }
    }

    /// Run `f` with this sink layered over the current thread's subscriber.
    /// Events are still forwarded to the previous default (console output,
    /// `GROUNDWORK_LOG` filtering), which is restored afterwards.
    pub fn scope<T>(&self, f: impl FnOnce() -> T) -> T {
        let outer = tracing::dispatcher::get_default(Dispatch::clone);
        let subscriber = Registry::default()
            .with(ForwardLayer { outer })
            .with(self.layer());
        let result = tracing::subscriber::with_default(subscriber, f);
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "failed to flush log file");
        }
        result
    }
}

/// [`Layer`] that turns tracing events into [`LogRecord`]s for a [`LogSink`].
pub struct SinkLayer {
    sink: LogSink,
}

// The level is checked per event rather than in `enabled`, which would also
// hide events from the layers composed next to this one.
impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.sink.max_level {
            return;
        }
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        self.sink.publish(&LogRecord {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            target: metadata.target().to_owned(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Hands events to the subscriber that was the default before the sink's
/// scope was entered.
struct ForwardLayer {
    outer: Dispatch,
}

impl<S: Subscriber> Layer<S> for ForwardLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if self.outer.enabled(event.metadata()) {
            self.outer.event(event);
        }
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            value.clone_into(&mut self.message);
        } else {
            self.fields.insert(field.name().to_owned(), value.to_owned());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message.clear();
            let _ = write!(self.message, "{value:?}");
        } else {
            self.fields
                .insert(field.name().to_owned(), format!("{value:?}"));
        }
    }
}
