//! Native references released off the owning thread

use parking_lot::Mutex;

/// Queue of native references whose release was requested from a thread
/// that may not touch the engine.
///
/// The owning thread drains the queue when it next enters the engine. Once
/// the engine is gone the queue is closed and further requests are dropped,
/// since the references died with the runtime.
#[derive(Debug)]
pub struct DeferredReleases {
    pending: Mutex<Option<Vec<usize>>>,
}

impl Default for DeferredReleases {
    fn default() -> Self {
        Self {
            pending: Mutex::new(Some(Vec::new())),
        }
    }
}

impl DeferredReleases {
    pub fn push(&self, raw: usize) {
        if let Some(pending) = self.pending.lock().as_mut() {
            pending.push(raw);
        }
    }

    pub fn drain(&self) -> Vec<usize> {
        self.pending
            .lock()
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Discards everything queued and ignores later requests.
    pub fn close(&self) -> usize {
        self.pending.lock().take().map_or(0, |pending| pending.len())
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().as_ref().map_or(0, Vec::len)
    }
}
