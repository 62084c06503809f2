/// GATT serial transport: connection state machine and flow-controlled writes
///
/// Wraps one radio link into a socket-like object: `connect`, `write` and
/// `disconnect` are called by the session, everything else is driven by
/// [`GattCallback`] invocations from the radio thread. Results travel back
/// through a [`TransportListener`].
///
/// All mutable state lives in a single `Connection` behind one mutex. Radio
/// operations are issued while holding it (see the reentrancy contract on
/// [`GattRadio`]); listener callbacks are always made after releasing it,
/// because a listener may call `disconnect` synchronously.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::config::{payload_size_for_mtu, SerialConfig};
use crate::error::SerialError;
use crate::gatt::{
    CharacteristicProperties, DeviceHandle, GattCharacteristic, GattDescriptor, GattService,
    GattStatus, LinkState, CCCD_UUID, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use crate::profile::{DeviceProfile, ProfileError, ProfileSelector};
use crate::radio::{GattCallback, GattRadio};

// ============================================================================
// LISTENER AND STATE
// ============================================================================

/// Receives the outcome of transport operations, on the radio thread.
pub trait TransportListener: Send + Sync {
    fn on_serial_connect(&self);
    fn on_serial_connect_error(&self, error: SerialError);
    fn on_serial_read(&self, data: Vec<u8>);
    fn on_serial_io_error(&self, error: SerialError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    DiscoveringServices,
    SelectingProfile,
    NegotiatingMtu,
    EnablingNotifications,
    Ready,
    Disconnected,
    ConnectError,
    IoError,
}

impl TransportState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransportState::Disconnected | TransportState::ConnectError | TransportState::IoError
        )
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

enum Notice {
    Connect,
    ConnectError(SerialError),
    Read(Vec<u8>),
    IoError(SerialError),
}

/// A listener call computed under the lock, delivered after releasing it
struct Pending {
    listener: Option<Arc<dyn TransportListener>>,
    notice: Notice,
}

impl Pending {
    fn deliver(self) {
        let Some(listener) = self.listener else {
            return;
        };
        match self.notice {
            Notice::Connect => listener.on_serial_connect(),
            Notice::ConnectError(e) => listener.on_serial_connect_error(e),
            Notice::Read(data) => listener.on_serial_read(data),
            Notice::IoError(e) => listener.on_serial_io_error(e),
        }
    }
}

fn deliver(pending: Option<Pending>) {
    if let Some(p) = pending {
        p.deliver();
    }
}

// ============================================================================
// CONNECTION
// ============================================================================

struct Connection {
    state: TransportState,
    device: Option<DeviceHandle>,
    listener: Option<Arc<dyn TransportListener>>,
    profile: Option<Arc<dyn DeviceProfile>>,
    read_characteristic: Option<GattCharacteristic>,
    write_characteristic: Option<GattCharacteristic>,
    payload_size: usize,
    link_open: bool,
    subscribed: bool,
    canceled: bool,
    /// Set once `Ready` was reached; decides ConnectError vs IoError on link loss
    reached_ready: bool,
    write_queue: VecDeque<Vec<u8>>,
    write_pending: bool,
}

impl Connection {
    fn new(payload_size: usize) -> Self {
        Self {
            state: TransportState::Idle,
            device: None,
            listener: None,
            profile: None,
            read_characteristic: None,
            write_characteristic: None,
            payload_size,
            link_open: false,
            subscribed: false,
            canceled: false,
            reached_ready: false,
            write_queue: VecDeque::new(),
            write_pending: false,
        }
    }

    fn notice(&self, notice: Notice) -> Pending {
        Pending {
            listener: self.listener.clone(),
            notice,
        }
    }

    fn fail_setup(&mut self, error: SerialError) -> Option<Pending> {
        if self.canceled {
            return None;
        }
        warn!("connect error: {}", error);
        self.canceled = true;
        self.state = TransportState::ConnectError;
        Some(self.notice(Notice::ConnectError(error)))
    }

    fn fail_runtime(&mut self, error: SerialError) -> Option<Pending> {
        if self.canceled {
            return None;
        }
        warn!("io error: {}", error);
        self.write_pending = false;
        self.canceled = true;
        self.state = TransportState::IoError;
        Some(self.notice(Notice::IoError(error)))
    }

    fn can_write(&self) -> bool {
        self.profile.as_ref().map_or(true, |p| p.can_write())
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

pub struct GattTransport {
    config: SerialConfig,
    selector: ProfileSelector,
    radio: Arc<dyn GattRadio>,
    conn: Mutex<Connection>,
}

impl GattTransport {
    pub fn new(radio: Arc<dyn GattRadio>) -> Self {
        Self::with_config(radio, SerialConfig::default(), ProfileSelector::default())
    }

    pub fn with_config(
        radio: Arc<dyn GattRadio>,
        config: SerialConfig,
        selector: ProfileSelector,
    ) -> Self {
        let payload_size = config.default_payload_size();
        Self {
            config,
            selector,
            radio,
            conn: Mutex::new(Connection::new(payload_size)),
        }
    }

    pub fn state(&self) -> TransportState {
        self.conn.lock().state
    }

    pub fn is_connected(&self) -> bool {
        let conn = self.conn.lock();
        conn.state == TransportState::Ready && !conn.canceled
    }

    /// Current maximum chunk size for outbound writes
    pub fn payload_size(&self) -> usize {
        self.conn.lock().payload_size
    }

    pub fn device(&self) -> Option<DeviceHandle> {
        self.conn.lock().device.clone()
    }

    /// Display name of the connected device, or its address
    pub fn name(&self) -> Option<String> {
        self.conn
            .lock()
            .device
            .as_ref()
            .map(|d| d.display_name().to_string())
    }

    pub fn profile_name(&self) -> Option<&'static str> {
        self.conn.lock().profile.as_ref().map(|p| p.name())
    }

    /// Chunks waiting behind the in-flight one
    pub fn queued_chunks(&self) -> usize {
        self.conn.lock().write_queue.len()
    }

    pub fn write_in_flight(&self) -> bool {
        self.conn.lock().write_pending
    }

    /// Start connecting to `device`.
    ///
    /// Returns immediately; success and most failures are reported to
    /// `listener` asynchronously.
    pub fn connect(
        &self,
        device: &DeviceHandle,
        listener: Arc<dyn TransportListener>,
    ) -> Result<(), SerialError> {
        let mut conn = self.conn.lock();
        if conn.link_open || conn.state == TransportState::Ready {
            return Err(SerialError::AlreadyConnected);
        }

        *conn = Connection::new(self.config.default_payload_size());
        conn.listener = Some(listener);
        conn.device = Some(device.clone());
        conn.state = TransportState::Connecting;

        if self.config.subscribe_system_events {
            match self.radio.subscribe_system_events() {
                Ok(()) => conn.subscribed = true,
                Err(e) => warn!("system event subscription failed: {}", e),
            }
        }

        debug!("connect {}", device);
        match self.radio.open_link(device) {
            Ok(()) => {
                conn.link_open = true;
                Ok(())
            }
            Err(e) => {
                if conn.subscribed {
                    self.radio.unsubscribe_system_events();
                    conn.subscribed = false;
                }
                conn.listener = None;
                conn.state = TransportState::Disconnected;
                Err(SerialError::ConnectionSetupFailed(e.to_string()))
            }
        }
        // continues asynchronously in on_connection_state_change()
    }

    /// Tear the connection down. Idempotent, safe before any `connect`.
    pub fn disconnect(&self) {
        let profile = {
            let mut conn = self.conn.lock();
            debug!("disconnect");
            conn.listener = None; // ignore remaining data and errors
            conn.device = None;
            conn.canceled = true;
            conn.write_pending = false;
            conn.write_queue.clear();
            conn.read_characteristic = None;
            conn.write_characteristic = None;
            conn.state = TransportState::Disconnected;
            if std::mem::take(&mut conn.link_open) {
                debug!("close link");
                self.radio.close_link();
            }
            if std::mem::take(&mut conn.subscribed) {
                self.radio.unsubscribe_system_events();
            }
            conn.profile.take()
        };
        if let Some(profile) = profile {
            profile.disconnect();
        }
    }

    /// Queue `data` for transmission in payload-sized chunks.
    pub fn write(&self, data: &[u8]) -> Result<(), SerialError> {
        let pending = {
            let mut conn = self.conn.lock();
            if conn.canceled
                || conn.state != TransportState::Ready
                || conn.write_characteristic.is_none()
            {
                return Err(SerialError::NotConnected);
            }
            let payload_size = conn.payload_size;
            for chunk in data.chunks(payload_size) {
                debug!("write queued, len={}", chunk.len());
                conn.write_queue.push_back(chunk.to_vec());
            }
            self.transmit_next(&mut conn)
        };
        deliver(pending);
        Ok(())
        // continues asynchronously in on_characteristic_write()
    }

    /// Start the head chunk unless one is in flight or the profile holds
    /// writes back.
    fn transmit_next(&self, conn: &mut Connection) -> Option<Pending> {
        if conn.write_pending || !conn.can_write() {
            return None;
        }
        let characteristic = conn.write_characteristic.clone()?;
        let chunk = conn.write_queue.pop_front()?;
        conn.write_pending = true;
        match self.radio.write_characteristic(
            &characteristic,
            &chunk,
            characteristic.preferred_write_type(),
        ) {
            Ok(()) => {
                debug!("write started, len={}", chunk.len());
                None
            }
            Err(e) => {
                debug!("write not issued: {}", e);
                conn.fail_runtime(SerialError::WriteFailed)
            }
        }
    }

    /// Profile hooks may lift a `can_write` hold (credits granted and the
    /// like); pick the queue back up when nothing is in flight.
    fn resume_writes(&self) {
        let pending = {
            let mut conn = self.conn.lock();
            if conn.canceled || conn.state != TransportState::Ready || conn.write_pending {
                return;
            }
            self.transmit_next(&mut conn)
        };
        deliver(pending);
    }

    fn start_mtu_negotiation(&self, conn: &mut Connection) -> Option<Pending> {
        if self.config.request_mtu {
            conn.state = TransportState::NegotiatingMtu;
            debug!("request max MTU {}", self.config.max_mtu);
            match self.radio.request_mtu(self.config.max_mtu) {
                // continues asynchronously in on_mtu_changed()
                Ok(()) => return None,
                Err(e) => debug!(
                    "MTU request not issued ({}), keeping payload size {}",
                    e, conn.payload_size
                ),
            }
        }
        self.enable_notifications(conn)
    }

    fn enable_notifications(&self, conn: &mut Connection) -> Option<Pending> {
        conn.state = TransportState::EnablingNotifications;
        let pair = match (&conn.read_characteristic, &conn.write_characteristic) {
            (Some(read), Some(write)) => Some((read.clone(), write.clone())),
            _ => None,
        };
        let Some((read, write)) = pair else {
            return conn.fail_setup(SerialError::NoSerialProfile);
        };

        // micro:bit and HM10 clones have WRITE, HM10, TI uart and Telit only WRITE_NO_RESPONSE
        if !write.properties.is_writable() {
            return conn.fail_setup(SerialError::WriteNotWritable);
        }

        let value = if read.properties.contains(CharacteristicProperties::INDICATE) {
            debug!("enable read indication");
            ENABLE_INDICATION_VALUE
        } else if read.properties.contains(CharacteristicProperties::NOTIFY) {
            debug!("enable read notification");
            ENABLE_NOTIFICATION_VALUE
        } else {
            return conn.fail_setup(SerialError::NoIndicationOrNotification(read.properties));
        };

        if let Err(e) = self.radio.set_characteristic_notification(&read, true) {
            debug!("set_characteristic_notification: {}", e);
            return conn.fail_setup(SerialError::NotificationRejected);
        }
        let Some(cccd) = read.descriptor(&CCCD_UUID) else {
            return conn.fail_setup(SerialError::MissingCccd);
        };
        debug!("writing read characteristic descriptor");
        if let Err(e) = self.radio.write_descriptor(&read, cccd, &value) {
            debug!("write_descriptor: {}", e);
            return conn.fail_setup(SerialError::CccdNotWritable);
        }
        None
        // continues asynchronously in on_descriptor_write()
    }

    fn current_profile(&self) -> Option<Arc<dyn DeviceProfile>> {
        self.conn.lock().profile.clone()
    }
}

impl Drop for GattTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// RADIO CALLBACKS
// ============================================================================

impl GattCallback for GattTransport {
    fn on_connection_state_change(&self, status: GattStatus, new_state: LinkState) {
        let pending = {
            let mut conn = self.conn.lock();
            if conn.canceled {
                return;
            }
            match new_state {
                LinkState::Connected => {
                    debug!("connect status {}, discover services", status);
                    conn.state = TransportState::DiscoveringServices;
                    match self.radio.discover_services() {
                        Ok(()) => None,
                        Err(e) => {
                            debug!("discover_services: {}", e);
                            conn.fail_setup(SerialError::DiscoverServicesFailed)
                        }
                    }
                }
                LinkState::Disconnected => {
                    if conn.reached_ready {
                        conn.fail_runtime(SerialError::LinkLost(status))
                    } else {
                        conn.fail_setup(SerialError::LinkStatus(status))
                    }
                }
                LinkState::Other(code) => {
                    debug!("unknown connect state {} {}", code, status);
                    None
                }
            }
        };
        deliver(pending);
        // continues asynchronously in on_services_discovered()
    }

    fn on_services_discovered(&self, status: GattStatus, services: Vec<GattService>) {
        let pending = {
            let mut conn = self.conn.lock();
            debug!("services discovered, status {}", status);
            if conn.canceled {
                return;
            }
            conn.state = TransportState::SelectingProfile;
            conn.write_pending = false;
            match self.selector.select(&services) {
                Ok(selection) => {
                    info!("serial profile {}", selection.profile.name());
                    conn.profile = Some(selection.profile);
                    conn.read_characteristic = Some(selection.pair.read);
                    conn.write_characteristic = Some(selection.pair.write);
                    self.start_mtu_negotiation(&mut conn)
                }
                Err(ProfileError::Unresolved) => {
                    for service in &services {
                        debug!("service {}", service.uuid);
                        for characteristic in &service.characteristics {
                            debug!("characteristic {}", characteristic.uuid);
                        }
                    }
                    conn.fail_setup(SerialError::NoSerialProfile)
                }
                Err(e) => conn.fail_setup(e.into()),
            }
        };
        deliver(pending);
    }

    fn on_mtu_changed(&self, mtu: u16, status: GattStatus) {
        let pending = {
            let mut conn = self.conn.lock();
            debug!("mtu size {}, status={}", mtu, status);
            if conn.canceled {
                return;
            }
            if status.is_success() {
                conn.payload_size = payload_size_for_mtu(mtu);
                debug!("payload size {}", conn.payload_size);
            }
            if conn.state == TransportState::NegotiatingMtu {
                self.enable_notifications(&mut conn)
            } else {
                None
            }
        };
        deliver(pending);
    }

    fn on_descriptor_write(
        &self,
        characteristic: &GattCharacteristic,
        descriptor: &GattDescriptor,
        status: GattStatus,
    ) {
        if let Some(profile) = self.current_profile() {
            profile.on_descriptor_write(self.radio.as_ref(), descriptor, status);
            self.resume_writes();
        }
        let pending = {
            let mut conn = self.conn.lock();
            if conn.canceled || conn.state != TransportState::EnablingNotifications {
                return;
            }
            let is_read = conn
                .read_characteristic
                .as_ref()
                .is_some_and(|read| read.same_attribute(characteristic));
            if !is_read {
                return;
            }
            debug!(
                "writing read characteristic descriptor finished, status={}",
                status
            );
            if !status.is_success() {
                conn.fail_setup(SerialError::DescriptorWriteFailed)
            } else {
                // Notifications may already be flowing at this point, so a
                // read can be reported before the connect.
                conn.state = TransportState::Ready;
                conn.reached_ready = true;
                info!("connected");
                Some(conn.notice(Notice::Connect))
            }
        };
        deliver(pending);
    }

    fn on_characteristic_changed(&self, characteristic: &GattCharacteristic, value: Vec<u8>) {
        if self.conn.lock().canceled {
            return;
        }
        if let Some(profile) = self.current_profile() {
            profile.on_characteristic_changed(self.radio.as_ref(), characteristic, &value);
            self.resume_writes();
        }
        let pending = {
            let conn = self.conn.lock();
            if conn.canceled {
                return;
            }
            let is_read = conn
                .read_characteristic
                .as_ref()
                .is_some_and(|read| read.same_attribute(characteristic));
            if !is_read {
                return;
            }
            trace!("read, len={} {}", value.len(), hex::encode(&value));
            conn.notice(Notice::Read(value))
        };
        pending.deliver();
    }

    fn on_characteristic_write(&self, characteristic: &GattCharacteristic, status: GattStatus) {
        {
            let mut conn = self.conn.lock();
            if conn.canceled
                || conn.state != TransportState::Ready
                || conn.write_characteristic.is_none()
            {
                return;
            }
            if !status.is_success() {
                let pending = conn.fail_runtime(SerialError::WriteFailed);
                drop(conn);
                deliver(pending);
                return;
            }
        }
        if let Some(profile) = self.current_profile() {
            profile.on_characteristic_write(self.radio.as_ref(), characteristic, status);
        }
        let pending = {
            let mut conn = self.conn.lock();
            if conn.canceled {
                return;
            }
            let is_write = conn
                .write_characteristic
                .as_ref()
                .is_some_and(|write| write.same_attribute(characteristic));
            if !is_write {
                return;
            }
            debug!("write finished, status={}", status);
            conn.write_pending = false;
            self.transmit_next(&mut conn)
        };
        deliver(pending);
    }

    fn on_pairing_request(&self, device: &DeviceHandle, variant: Option<i32>) {
        let pending = {
            let mut conn = self.conn.lock();
            if conn.device.as_ref() != Some(device) {
                return;
            }
            debug!("pairing request {:?}", variant);
            // pairing is done by the platform; the attempt is restarted afterwards
            conn.fail_setup(SerialError::PairingRequested)
        };
        deliver(pending);
    }

    fn on_bond_state_changed(&self, device: &DeviceHandle, previous: i32, current: i32) {
        if self.conn.lock().device.as_ref() == Some(device) {
            debug!("bond state {}->{}", previous, current);
        }
    }

    fn on_disconnect_requested(&self) {
        let pending = self
            .conn
            .lock()
            .fail_runtime(SerialError::BackgroundDisconnect);
        deliver(pending);
        // disconnect now, else it would wait until a consumer re-attaches
        self.disconnect();
    }
}
