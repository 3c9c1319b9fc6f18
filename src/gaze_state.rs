//! Latest gaze status shared between the analysis worker and the UI.
//!
//! There is exactly one [`GazeWriter`], owned by the analyzer. Any number of
//! [`GazeReader`]s can observe it from other threads.

use tokio::sync::watch;

use crate::gaze::GazeStatus;

pub struct GazeState;

impl GazeState {
    pub fn new() -> (GazeWriter, GazeReader) {
        let (tx, rx) = watch::channel(None);
        (GazeWriter { tx }, GazeReader { rx })
    }
}

#[derive(Debug)]
pub struct GazeWriter {
    tx: watch::Sender<Option<GazeStatus>>,
}

impl GazeWriter {
    /// Replaces the current status and wakes all readers. Succeeds even when
    /// no reader is alive.
    pub fn publish(&self, status: GazeStatus) {
        self.tx.send_replace(Some(status));
    }

    pub fn current(&self) -> Option<GazeStatus> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> GazeReader {
        GazeReader {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GazeReader {
    rx: watch::Receiver<Option<GazeStatus>>,
}

impl GazeReader {
    pub fn current(&self) -> Option<GazeStatus> {
        *self.rx.borrow()
    }

    /// The label text, if anything has been published yet.
    pub fn text(&self) -> Option<String> {
        self.current().map(|s| s.to_string())
    }

    /// True when a status was published since this reader last looked.
    /// Always false once the writer is gone.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Returns the current status and marks it as seen.
    pub fn mark_seen(&mut self) -> Option<GazeStatus> {
        *self.rx.borrow_and_update()
    }

    /// Waits for the next publish. Returns `None` once the writer is dropped.
    pub async fn changed(&mut self) -> Option<GazeStatus> {
        self.rx.changed().await.ok()?;
        *self.rx.borrow_and_update()
    }
}
