/// Serial events, consumer listener and the buffering used while no
/// consumer is attached.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::SerialError;

/// What the consumer receives, in transport order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    Connected,
    ConnectError(SerialError),
    /// One or more inbound notifications, oldest first
    DataRead(VecDeque<Vec<u8>>),
    IoError(SerialError),
}

impl SerialEvent {
    pub fn read(data: Vec<u8>) -> Self {
        SerialEvent::DataRead(VecDeque::from([data]))
    }

    /// Errors end the session when nobody is attached to see them
    pub fn is_error(&self) -> bool {
        matches!(self, SerialEvent::ConnectError(_) | SerialEvent::IoError(_))
    }

    pub fn dispatch(self, listener: &dyn SerialListener) {
        match self {
            SerialEvent::Connected => listener.on_connected(),
            SerialEvent::ConnectError(e) => listener.on_connect_error(e),
            SerialEvent::DataRead(datas) => listener.on_data_read(datas),
            SerialEvent::IoError(e) => listener.on_io_error(e),
        }
    }
}

/// The consumer side (typically a UI). Always called on the delivery loop.
pub trait SerialListener: Send + Sync {
    fn on_connected(&self);
    fn on_connect_error(&self, error: SerialError);
    fn on_data_read(&self, datas: VecDeque<Vec<u8>>);
    fn on_io_error(&self, error: SerialError);
}

// ============================================================================
// QUEUES
// ============================================================================

/// Events held back while no consumer is attached.
///
/// `missed` takes events that were posted while a consumer was attached but
/// found it gone when they ran on the loop. `detached` takes events that
/// arrived while no consumer was attached at all. `missed` is always older,
/// so it replays first.
#[derive(Debug, Default)]
pub struct EventQueues {
    missed: VecDeque<SerialEvent>,
    detached: VecDeque<SerialEvent>,
}

impl EventQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_missed(&mut self, event: SerialEvent) {
        self.missed.push_back(event);
    }

    /// Append, merging a read into a tail that is already a read.
    pub fn push_detached(&mut self, event: SerialEvent) {
        if let SerialEvent::DataRead(mut datas) = event {
            match self.detached.back_mut() {
                Some(SerialEvent::DataRead(tail)) => tail.append(&mut datas),
                _ => self.detached.push_back(SerialEvent::DataRead(datas)),
            }
            return;
        }
        self.detached.push_back(event);
    }

    /// Take everything in replay order
    pub fn drain(&mut self) -> Vec<SerialEvent> {
        let mut events = self.drain_missed();
        events.extend(self.drain_detached());
        events
    }

    pub fn drain_missed(&mut self) -> Vec<SerialEvent> {
        self.missed.drain(..).collect()
    }

    pub fn drain_detached(&mut self) -> Vec<SerialEvent> {
        self.detached.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.missed.len() + self.detached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missed.is_empty() && self.detached.is_empty()
    }

    pub fn clear(&mut self) {
        self.missed.clear();
        self.detached.clear();
    }
}

// ============================================================================
// READ COALESCING
// ============================================================================

/// Buffers collected for one delivery task
#[derive(Debug, Clone)]
pub struct ReadBatch(Arc<Mutex<VecDeque<Vec<u8>>>>);

impl ReadBatch {
    fn new(data: Vec<u8>) -> Self {
        Self(Arc::new(Mutex::new(VecDeque::from([data]))))
    }

    fn is(&self, other: &ReadBatch) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Merges reads arriving faster than the loop drains them.
///
/// The first read opens a batch and the caller posts one delivery task for
/// it; later reads join the open batch. The task closes the batch when it
/// runs. Any other event sealing the batch makes the next read open a new
/// one, so a read is never delivered ahead of an earlier event.
#[derive(Debug, Default)]
pub struct ReadCoalescer {
    open: Mutex<Option<ReadBatch>>,
}

impl ReadCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new batch when a delivery task has to be posted
    pub fn push(&self, data: Vec<u8>) -> Option<ReadBatch> {
        let mut open = self.open.lock();
        if let Some(batch) = open.as_ref() {
            batch.0.lock().push_back(data);
            return None;
        }
        let batch = ReadBatch::new(data);
        *open = Some(batch.clone());
        Some(batch)
    }

    pub fn seal(&self) {
        self.open.lock().take();
    }

    /// Close `batch` if still open and take its buffers
    pub fn take(&self, batch: &ReadBatch) -> VecDeque<Vec<u8>> {
        let mut open = self.open.lock();
        if open.as_ref().is_some_and(|b| b.is(batch)) {
            *open = None;
        }
        std::mem::take(&mut *batch.0.lock())
    }
}
