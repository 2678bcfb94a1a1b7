//! Per-operation log
//!
//! Buffers every line of one issue/renew/revoke for persistence and, when a
//! listener is attached, forwards each line over a bounded queue. A slow or
//! absent listener never blocks the operation: when the queue is full the
//! line is dropped from the stream (it stays in the transcript).

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use certward_common::{CertificateId, OperationId};

use crate::error::StoreError;
use crate::store::Store;

/// Capacity of the listener delivery queue
pub const LOG_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
    Success,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => f.write_str("INFO"),
            LogLevel::Error => f.write_str("ERROR"),
            LogLevel::Success => f.write_str("SUCCESS"),
        }
    }
}

/// One timestamped transcript line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.at.format("%Y/%m/%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Where streamed lines go
#[derive(Debug)]
pub enum LogSink {
    Listener(mpsc::Sender<LogLine>),
    Discard,
}

impl LogSink {
    /// Listener sink plus the receiving end of its queue
    pub fn channel() -> (Self, mpsc::Receiver<LogLine>) {
        let (tx, rx) = mpsc::channel(LOG_QUEUE_CAPACITY);
        (LogSink::Listener(tx), rx)
    }
}

#[derive(Debug)]
struct LogState {
    lines: Vec<LogLine>,
    sink: LogSink,
    certificate: Option<CertificateId>,
    dropped: usize,
    closed: bool,
}

/// Log of a single certificate operation
#[derive(Debug)]
pub struct OperationLog {
    id: OperationId,
    state: Mutex<LogState>,
}

impl OperationLog {
    pub fn new(sink: LogSink) -> Self {
        Self {
            id: OperationId::new(),
            state: Mutex::new(LogState {
                lines: Vec::new(),
                sink,
                certificate: None,
                dropped: 0,
                closed: false,
            }),
        }
    }

    /// Log without a listener
    pub fn discard() -> Self {
        Self::new(LogSink::Discard)
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Persist the transcript to this certificate on close
    pub fn attach(&self, certificate: CertificateId) {
        self.state.lock().certificate = Some(certificate);
    }

    pub fn certificate(&self) -> Option<CertificateId> {
        self.state.lock().certificate
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(operation = %self.id, "{}", message);
        self.push(LogLevel::Info, message);
    }

    pub fn error(&self, err: &dyn fmt::Display) {
        let message = err.to_string();
        error!(operation = %self.id, "{}", message);
        self.push(LogLevel::Error, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        let message = message.into();
        info!(operation = %self.id, outcome = "success", "{}", message);
        self.push(LogLevel::Success, message);
    }

    fn push(&self, level: LogLevel, message: String) {
        let line = LogLine {
            at: Utc::now(),
            level,
            message,
        };

        let mut state = self.state.lock();
        state.lines.push(line.clone());
        if state.closed {
            return;
        }

        if let LogSink::Listener(tx) = &state.sink {
            match tx.try_send(line) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    state.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Listener went away; keep buffering only
                    state.sink = LogSink::Discard;
                }
            }
        }
    }

    /// All buffered lines in production order
    pub fn lines(&self) -> Vec<LogLine> {
        self.state.lock().lines.clone()
    }

    /// Buffered lines rendered one per line
    pub fn transcript(&self) -> String {
        let state = self.state.lock();
        let mut out = String::new();
        for line in &state.lines {
            out.push_str(&line.to_string());
            out.push('\n');
        }
        out
    }

    /// Lines that could not be streamed because the queue was full
    pub fn dropped(&self) -> usize {
        self.state.lock().dropped
    }

    /// Stop delivery and persist the transcript to the attached certificate
    ///
    /// Closing twice is a no-op for delivery; the transcript is written again.
    pub async fn close(&self, store: &dyn Store) -> Result<(), StoreError> {
        let (certificate, transcript, dropped) = {
            let mut state = self.state.lock();
            state.closed = true;
            state.sink = LogSink::Discard;
            let mut out = String::new();
            for line in &state.lines {
                out.push_str(&line.to_string());
                out.push('\n');
            }
            (state.certificate, out, state.dropped)
        };

        if dropped > 0 {
            warn!(
                operation = %self.id,
                dropped,
                "Log listener fell behind; lines were not streamed"
            );
        }

        match certificate {
            Some(id) => store.set_certificate_log(id, &transcript).await,
            None => Ok(()),
        }
    }
}
