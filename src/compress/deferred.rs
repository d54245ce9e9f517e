//! Compression on a worker.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};

use super::{CompressionResult, Compressor};
use crate::storage::memory::lock;
use crate::storage::{Blob, ByteStorage};
use crate::{Error, Result};

enum TaskState {
    Pending(Receiver<Result<CompressionResult>>),
    Done(std::result::Result<CompressionResult, String>),
}

/// Handle to a compression that may still be running.
pub struct CompressionTask {
    state: Mutex<TaskState>,
}

impl std::fmt::Debug for CompressionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = matches!(*lock(&self.state), TaskState::Pending(_));
        f.debug_struct("CompressionTask")
            .field("pending", &pending)
            .finish()
    }
}

impl CompressionTask {
    /// A task that already has its result.
    pub fn finished(result: Result<CompressionResult>) -> Self {
        Self {
            state: Mutex::new(TaskState::Done(result.map_err(|e| e.to_string()))),
        }
    }

    fn pending(receiver: Receiver<Result<CompressionResult>>) -> Self {
        Self {
            state: Mutex::new(TaskState::Pending(receiver)),
        }
    }

    /// Whether the result is available without blocking.
    pub fn is_finished(&self) -> bool {
        let mut state = lock(&self.state);
        let outcome = match &*state {
            TaskState::Pending(receiver) => match receiver.try_recv() {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(mpsc::TryRecvError::Empty) => return false,
                Err(mpsc::TryRecvError::Disconnected) => Err("compression worker vanished".into()),
            },
            TaskState::Done(_) => return true,
        };
        *state = TaskState::Done(outcome);
        true
    }

    /// Blocks until the compression has finished and returns its result.
    ///
    /// May be called any number of times.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compression`] if the compression failed or its worker
    /// panicked.
    pub fn wait(&self) -> Result<CompressionResult> {
        let mut state = lock(&self.state);
        let outcome = match &*state {
            TaskState::Pending(receiver) => Some(match receiver.recv() {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err("compression worker vanished".into()),
            }),
            TaskState::Done(_) => None,
        };
        if let Some(outcome) = outcome {
            *state = TaskState::Done(outcome);
        }
        match &*state {
            TaskState::Done(Ok(result)) => Ok(result.clone()),
            TaskState::Done(Err(message)) => Err(Error::Compression(message.clone())),
            TaskState::Pending(_) => Err(Error::Compression("compression still pending".into())),
        }
    }
}

/// Runs another compressor on a worker thread.
///
/// With the `parallel` feature the work goes to rayon's global pool,
/// otherwise every task gets a thread of its own.
#[derive(Debug, Clone)]
pub struct DeferredCompressor {
    inner: Arc<dyn Compressor>,
}

impl DeferredCompressor {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn Compressor>) -> Self {
        Self { inner }
    }
}

fn run(inner: &dyn Compressor, source: Blob, storage: &Arc<dyn ByteStorage>) -> Result<CompressionResult> {
    match panic::catch_unwind(AssertUnwindSafe(|| inner.compress(source, storage))) {
        Ok(result) => result,
        Err(_) => Err(Error::Compression("compression worker panicked".into())),
    }
}

impl Compressor for DeferredCompressor {
    fn compress(&self, source: Blob, storage: &Arc<dyn ByteStorage>) -> Result<CompressionResult> {
        self.compress_deferred(source, storage).wait()
    }

    fn compress_deferred(&self, source: Blob, storage: &Arc<dyn ByteStorage>) -> CompressionTask {
        let (sender, receiver) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let storage = Arc::clone(storage);
        let job = move || {
            let result = run(inner.as_ref(), source, &storage);
            // The handle may have been dropped; nobody wants the result then.
            let _ = sender.send(result);
        };

        #[cfg(feature = "parallel")]
        rayon::spawn(job);

        #[cfg(not(feature = "parallel"))]
        std::thread::spawn(job);

        CompressionTask::pending(receiver)
    }
}
