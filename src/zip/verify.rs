//! Sinks for non-fatal integrity findings.
//!
//! Opening an archive compares every local header with its central
//! directory record. Disagreements (CRC, sizes, version needed to extract,
//! extra fields) do not fail the open; they are appended to a
//! [`VerifyLog`] so the caller can decide whether the archive is usable.

use std::sync::{Arc, Mutex};

use crate::storage::memory::lock;

#[derive(Debug)]
enum Sink {
    Discard,
    Keep(Mutex<Vec<String>>),
}

/// A log of integrity messages. Clones share the same messages.
#[derive(Debug, Clone)]
pub struct VerifyLog {
    sink: Arc<Sink>,
}

impl Default for VerifyLog {
    fn default() -> Self {
        Self::discarding()
    }
}

impl VerifyLog {
    /// A log that drops every message.
    pub fn discarding() -> Self {
        Self {
            sink: Arc::new(Sink::Discard),
        }
    }

    /// A log that keeps every message.
    pub fn unlimited() -> Self {
        Self {
            sink: Arc::new(Sink::Keep(Mutex::new(Vec::new()))),
        }
    }

    /// Records a message.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        match &*self.sink {
            Sink::Discard => log::debug!("verify: {message}"),
            Sink::Keep(messages) => {
                log::warn!("verify: {message}");
                lock(messages).push(message);
            }
        }
    }

    /// Messages recorded so far, oldest first.
    pub fn logs(&self) -> Vec<String> {
        match &*self.sink {
            Sink::Discard => Vec::new(),
            Sink::Keep(messages) => lock(messages).clone(),
        }
    }

    /// Returns `true` if messages are dropped.
    pub fn is_discarding(&self) -> bool {
        matches!(*self.sink, Sink::Discard)
    }
}

/// Creates the logs of an archive and of each of its entries.
#[derive(Debug, Clone, Default)]
pub enum VerifyLogFactory {
    /// Every log drops its messages.
    #[default]
    Discarding,
    /// Every log keeps its own messages.
    Unlimited,
    /// Every log writes into the given log.
    Shared(VerifyLog),
}

impl VerifyLogFactory {
    /// Creates a log.
    pub fn create(&self) -> VerifyLog {
        match self {
            VerifyLogFactory::Discarding => VerifyLog::discarding(),
            VerifyLogFactory::Unlimited => VerifyLog::unlimited(),
            VerifyLogFactory::Shared(log) => log.clone(),
        }
    }
}
