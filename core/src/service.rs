/// Serial session service
///
/// Owns one transport session and relays its events to a consumer that may
/// come and go (a UI being recreated, backgrounded, ...). Events always
/// reach the consumer on the delivery loop, in transport order, and nothing
/// is lost while the consumer is away: events are queued and replayed on
/// the next `attach`.
///
/// `shared` is locked before the coalescer, never the other way round. No
/// lock is held while calling the consumer or the transport.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::bus::{EventQueues, ReadBatch, ReadCoalescer, SerialEvent, SerialListener};
use crate::error::SerialError;
use crate::gatt::DeviceHandle;
use crate::looper::DeliveryLoop;
use crate::transport::{GattTransport, TransportListener};

/// Foreground status shown while a session runs without a consumer
pub trait ForegroundNotifier: Send + Sync {
    fn show_connected(&self, name: &str);
    fn cancel(&self);
}

enum Binding {
    Bound(Arc<dyn SerialListener>),
    Unbound,
}

impl Binding {
    fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound(_))
    }
}

struct Shared {
    binding: Binding,
    queues: EventQueues,
    /// Sequence numbers of the last delivery task posted / run
    posted: u64,
    completed: u64,
    /// Detached events are replayed once this task has run
    replay_after: Option<u64>,
}

#[derive(Default)]
struct Session {
    transport: Option<Arc<GattTransport>>,
    name: Option<String>,
    connected: bool,
}

struct ServiceInner {
    me: Weak<ServiceInner>,
    delivery: Arc<dyn DeliveryLoop>,
    notifier: Option<Arc<dyn ForegroundNotifier>>,
    shared: Mutex<Shared>,
    reads: ReadCoalescer,
    session: Mutex<Session>,
}

pub struct SerialService {
    inner: Arc<ServiceInner>,
}

impl SerialService {
    pub fn new(delivery: Arc<dyn DeliveryLoop>) -> Self {
        Self::build(delivery, None)
    }

    pub fn with_notifier(
        delivery: Arc<dyn DeliveryLoop>,
        notifier: Arc<dyn ForegroundNotifier>,
    ) -> Self {
        Self::build(delivery, Some(notifier))
    }

    fn build(
        delivery: Arc<dyn DeliveryLoop>,
        notifier: Option<Arc<dyn ForegroundNotifier>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|me| ServiceInner {
            me: me.clone(),
            delivery,
            notifier,
            shared: Mutex::new(Shared {
                binding: Binding::Unbound,
                queues: EventQueues::new(),
                posted: 0,
                completed: 0,
                replay_after: None,
            }),
            reads: ReadCoalescer::new(),
            session: Mutex::new(Session::default()),
        });
        Self { inner }
    }

    /// Start a session over `transport`. Events flow to the attached
    /// consumer, or are queued until one attaches.
    pub fn connect(
        &self,
        transport: Arc<GattTransport>,
        device: &DeviceHandle,
    ) -> Result<(), SerialError> {
        {
            let mut session = self.inner.session.lock();
            if session.connected {
                return Err(SerialError::AlreadyConnected);
            }
            session.connected = true;
            session.name = Some(device.display_name().to_string());
            session.transport = Some(transport.clone());
        }

        let listener: Arc<dyn TransportListener> = self.inner.clone();
        if let Err(e) = transport.connect(device, listener) {
            let mut session = self.inner.session.lock();
            *session = Session::default();
            return Err(e);
        }
        info!("session started for {}", device);
        Ok(())
    }

    pub fn write(&self, data: &[u8]) -> Result<(), SerialError> {
        let transport = {
            let session = self.inner.session.lock();
            if !session.connected {
                return Err(SerialError::NotConnected);
            }
            session.transport.clone()
        };
        transport.ok_or(SerialError::NotConnected)?.write(data)
    }

    /// End the session. Idempotent; events the transport produces afterwards
    /// are dropped.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.session.lock().connected
    }

    /// The transport of the running session
    pub fn transport(&self) -> Option<Arc<GattTransport>> {
        self.inner.session.lock().transport.clone()
    }

    /// Events waiting for a consumer
    pub fn queued_events(&self) -> usize {
        self.inner.shared.lock().queues.len()
    }

    /// Bind `listener` and replay everything queued while unbound.
    ///
    /// Must be called on the delivery loop thread.
    pub fn attach(&self, listener: Arc<dyn SerialListener>) -> Result<(), SerialError> {
        if !self.inner.delivery.is_loop_thread() {
            return Err(SerialError::NotOnDeliveryThread);
        }
        if let Some(notifier) = &self.inner.notifier {
            notifier.cancel();
        }
        let pending = {
            let mut shared = self.inner.shared.lock();
            shared.binding = Binding::Bound(listener.clone());
            self.inner.reads.seal();
            let mut pending = shared.queues.drain_missed();
            if shared.completed < shared.posted {
                // tasks posted before the last detach are older than the
                // detached events, so those wait until the tasks ran
                shared.replay_after = Some(shared.posted);
            } else {
                shared.replay_after = None;
                pending.extend(shared.queues.drain_detached());
            }
            pending
        };
        debug!("attach, replaying {} queued events", pending.len());
        for event in pending {
            event.dispatch(listener.as_ref());
        }
        Ok(())
    }

    /// Unbind the consumer; subsequent events are queued.
    pub fn detach(&self) {
        if let Some(notifier) = &self.inner.notifier {
            let name = {
                let session = self.inner.session.lock();
                session
                    .connected
                    .then(|| session.name.clone().unwrap_or_default())
            };
            if let Some(name) = name {
                notifier.show_connected(&name);
            }
        }
        debug!("detach");
        let mut shared = self.inner.shared.lock();
        shared.binding = Binding::Unbound;
        // reads from now on queue behind the detached events
        self.inner.reads.seal();
    }
}

impl Drop for SerialService {
    fn drop(&mut self) {
        self.inner.disconnect();
    }
}

impl ServiceInner {
    fn disconnect(&self) {
        let transport = {
            let mut session = self.session.lock();
            session.connected = false;
            session.name = None;
            session.transport.take()
        };
        if let Some(notifier) = &self.notifier {
            notifier.cancel();
        }
        if let Some(transport) = transport {
            debug!("session disconnect");
            transport.disconnect();
        }
    }

    fn is_live(&self) -> bool {
        self.session.lock().connected
    }

    fn route(&self, event: SerialEvent) {
        let mut shared = self.shared.lock();
        if shared.binding.is_bound() && shared.replay_after.is_some() {
            // detached events still wait for their replay, queue behind them
            shared.queues.push_detached(event);
        } else if shared.binding.is_bound() {
            self.reads.seal();
            shared.posted += 1;
            let seq = shared.posted;
            let me = self.me.clone();
            self.delivery.post(Box::new(move || {
                if let Some(inner) = me.upgrade() {
                    inner.deliver(seq, Some(event));
                }
            }));
        } else {
            let fatal = event.is_error();
            shared.queues.push_detached(event);
            drop(shared);
            if fatal {
                self.disconnect();
            }
        }
    }

    fn route_read(&self, data: Vec<u8>) {
        let mut shared = self.shared.lock();
        if shared.binding.is_bound() && shared.replay_after.is_none() {
            if let Some(batch) = self.reads.push(data) {
                shared.posted += 1;
                let seq = shared.posted;
                let me = self.me.clone();
                self.delivery.post(Box::new(move || {
                    if let Some(inner) = me.upgrade() {
                        inner.deliver_batch(seq, batch);
                    }
                }));
            }
        } else {
            shared.queues.push_detached(SerialEvent::read(data));
        }
    }

    /// Runs on the loop: hand to the consumer, or queue if it left meanwhile
    fn deliver(&self, seq: u64, event: Option<SerialEvent>) {
        let mut shared = self.shared.lock();
        shared.completed = seq;
        let replay = shared.replay_after == Some(seq);
        if replay {
            shared.replay_after = None;
        }
        let listener = match &shared.binding {
            Binding::Bound(listener) => Some(listener.clone()),
            Binding::Unbound => None,
        };
        match listener {
            Some(listener) => {
                let mut events: Vec<SerialEvent> = event.into_iter().collect();
                if replay {
                    events.extend(shared.queues.drain_detached());
                }
                drop(shared);
                for event in events {
                    event.dispatch(listener.as_ref());
                }
            }
            None => {
                let Some(event) = event else {
                    return;
                };
                let fatal = event.is_error();
                shared.queues.push_missed(event);
                drop(shared);
                if fatal {
                    self.disconnect();
                }
            }
        }
    }

    fn deliver_batch(&self, seq: u64, batch: ReadBatch) {
        let datas: VecDeque<Vec<u8>> = self.reads.take(&batch);
        let event = (!datas.is_empty()).then_some(SerialEvent::DataRead(datas));
        self.deliver(seq, event);
    }
}

impl TransportListener for ServiceInner {
    fn on_serial_connect(&self) {
        if self.is_live() {
            self.route(SerialEvent::Connected);
        }
    }

    fn on_serial_connect_error(&self, error: SerialError) {
        if self.is_live() {
            self.route(SerialEvent::ConnectError(error));
        }
    }

    fn on_serial_read(&self, data: Vec<u8>) {
        if self.is_live() {
            self.route_read(data);
        }
    }

    fn on_serial_io_error(&self, error: SerialError) {
        if self.is_live() {
            self.route(SerialEvent::IoError(error));
        }
    }
}
