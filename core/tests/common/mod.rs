// Shared fixtures: a recording radio, recording listeners and helpers that
// walk a transport through connection establishment.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gattserial_core::gatt::{NORDIC_UART_RW2_UUID, NORDIC_UART_RW3_UUID, NORDIC_UART_SERVICE_UUID};
use gattserial_core::{
    CharacteristicProperties, DeviceHandle, GattCallback, GattCharacteristic, GattDescriptor,
    GattRadio, GattService, GattStatus, GattTransport, LinkState, RadioError, SerialError,
    SerialEvent, SerialListener, TransportListener, WriteType,
};

pub const WRITE_HANDLE: u16 = 0x10;
pub const READ_HANDLE: u16 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioOp {
    Subscribe,
    Unsubscribe,
    OpenLink(String),
    DiscoverServices,
    RequestMtu(u16),
    SetNotification(u16, bool),
    WriteDescriptor(u16, Vec<u8>),
    WriteCharacteristic(u16, Vec<u8>, WriteType),
    CloseLink,
}

#[derive(Default)]
pub struct FakeRadio {
    ops: Mutex<Vec<RadioOp>>,
    pub reject_mtu: AtomicBool,
    pub reject_notification: AtomicBool,
    pub reject_descriptor: AtomicBool,
    pub reject_writes: AtomicBool,
}

impl FakeRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ops(&self) -> Vec<RadioOp> {
        self.ops.lock().clone()
    }

    pub fn count(&self, op: &RadioOp) -> usize {
        self.ops.lock().iter().filter(|o| *o == op).count()
    }

    /// Payloads of all characteristic writes, in issue order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                RadioOp::WriteCharacteristic(_, data, _) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: RadioOp) {
        self.ops.lock().push(op);
    }
}

impl GattRadio for FakeRadio {
    fn open_link(&self, device: &DeviceHandle) -> Result<(), RadioError> {
        self.record(RadioOp::OpenLink(device.address.clone()));
        Ok(())
    }

    fn discover_services(&self) -> Result<(), RadioError> {
        self.record(RadioOp::DiscoverServices);
        Ok(())
    }

    fn request_mtu(&self, mtu: u16) -> Result<(), RadioError> {
        if self.reject_mtu.load(Ordering::SeqCst) {
            return Err(RadioError::Unsupported);
        }
        self.record(RadioOp::RequestMtu(mtu));
        Ok(())
    }

    fn set_characteristic_notification(
        &self,
        characteristic: &GattCharacteristic,
        enable: bool,
    ) -> Result<(), RadioError> {
        if self.reject_notification.load(Ordering::SeqCst) {
            return Err(RadioError::Rejected("notification".into()));
        }
        self.record(RadioOp::SetNotification(characteristic.handle, enable));
        Ok(())
    }

    fn write_descriptor(
        &self,
        _characteristic: &GattCharacteristic,
        descriptor: &GattDescriptor,
        value: &[u8],
    ) -> Result<(), RadioError> {
        if self.reject_descriptor.load(Ordering::SeqCst) {
            return Err(RadioError::Rejected("descriptor".into()));
        }
        self.record(RadioOp::WriteDescriptor(descriptor.handle, value.to_vec()));
        Ok(())
    }

    fn write_characteristic(
        &self,
        characteristic: &GattCharacteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), RadioError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(RadioError::Rejected("busy".into()));
        }
        self.record(RadioOp::WriteCharacteristic(
            characteristic.handle,
            data.to_vec(),
            write_type,
        ));
        Ok(())
    }

    fn close_link(&self) {
        self.record(RadioOp::CloseLink);
    }

    fn subscribe_system_events(&self) -> Result<(), RadioError> {
        self.record(RadioOp::Subscribe);
        Ok(())
    }

    fn unsubscribe_system_events(&self) {
        self.record(RadioOp::Unsubscribe);
    }
}

// ============================================================================
// LISTENERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Connect,
    ConnectError(SerialError),
    Read(Vec<u8>),
    IoError(SerialError),
}

#[derive(Default)]
pub struct RecordingListener {
    seen: Mutex<Vec<Seen>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

impl TransportListener for RecordingListener {
    fn on_serial_connect(&self) {
        self.seen.lock().push(Seen::Connect);
    }
    fn on_serial_connect_error(&self, error: SerialError) {
        self.seen.lock().push(Seen::ConnectError(error));
    }
    fn on_serial_read(&self, data: Vec<u8>) {
        self.seen.lock().push(Seen::Read(data));
    }
    fn on_serial_io_error(&self, error: SerialError) {
        self.seen.lock().push(Seen::IoError(error));
    }
}

#[derive(Default)]
pub struct Consumer {
    events: Mutex<Vec<SerialEvent>>,
}

impl Consumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SerialEvent> {
        self.events.lock().clone()
    }

    /// All delivered read buffers, flattened in delivery order
    pub fn bytes(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SerialEvent::DataRead(datas) => Some(datas.iter().flatten().copied().collect::<Vec<u8>>()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl SerialListener for Consumer {
    fn on_connected(&self) {
        self.events.lock().push(SerialEvent::Connected);
    }
    fn on_connect_error(&self, error: SerialError) {
        self.events.lock().push(SerialEvent::ConnectError(error));
    }
    fn on_data_read(&self, datas: VecDeque<Vec<u8>>) {
        self.events.lock().push(SerialEvent::DataRead(datas));
    }
    fn on_io_error(&self, error: SerialError) {
        self.events.lock().push(SerialEvent::IoError(error));
    }
}

// ============================================================================
// PERIPHERAL LAYOUT AND DRIVERS
// ============================================================================

pub fn device() -> DeviceHandle {
    DeviceHandle::new("C0:FF:EE:00:00:01").with_name("micro:bit")
}

pub fn write_characteristic(properties: CharacteristicProperties) -> GattCharacteristic {
    GattCharacteristic::new(NORDIC_UART_RW2_UUID, WRITE_HANDLE, properties)
}

pub fn read_characteristic(properties: CharacteristicProperties) -> GattCharacteristic {
    GattCharacteristic::new(NORDIC_UART_RW3_UUID, READ_HANDLE, properties).with_cccd()
}

pub fn uart_services_with(
    write_props: CharacteristicProperties,
    read_props: CharacteristicProperties,
) -> Vec<GattService> {
    vec![GattService::new(NORDIC_UART_SERVICE_UUID)
        .with_characteristic(write_characteristic(write_props))
        .with_characteristic(read_characteristic(read_props))]
}

pub fn uart_services() -> Vec<GattService> {
    uart_services_with(
        CharacteristicProperties::WRITE | CharacteristicProperties::WRITE_NO_RESPONSE,
        CharacteristicProperties::NOTIFY,
    )
}

/// Drive the radio callbacks up to `Ready`, answering the MTU request with
/// `mtu` when given.
pub fn establish(transport: &GattTransport, mtu: Option<u16>) {
    transport.on_connection_state_change(GattStatus::SUCCESS, LinkState::Connected);
    transport.on_services_discovered(GattStatus::SUCCESS, uart_services());
    if let Some(mtu) = mtu {
        transport.on_mtu_changed(mtu, GattStatus::SUCCESS);
    }
    confirm_cccd(transport, GattStatus::SUCCESS);
}

pub fn confirm_cccd(transport: &GattTransport, status: GattStatus) {
    let read = read_characteristic(CharacteristicProperties::NOTIFY);
    let cccd = read.descriptors[0].clone();
    transport.on_descriptor_write(&read, &cccd, status);
}

/// Peer confirms the in-flight chunk
pub fn confirm_write(transport: &GattTransport) {
    let write = write_characteristic(CharacteristicProperties::WRITE);
    transport.on_characteristic_write(&write, GattStatus::SUCCESS);
}

/// Peer sends a notification on the read characteristic
pub fn notify(transport: &GattTransport, data: &[u8]) {
    let read = read_characteristic(CharacteristicProperties::NOTIFY);
    transport.on_characteristic_changed(&read, data.to_vec());
}

/// Debug output for failing tests (`cargo test -- --nocapture`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn connected_transport(mtu: Option<u16>) -> (Arc<FakeRadio>, Arc<GattTransport>, Arc<RecordingListener>) {
    init_tracing();
    let radio = FakeRadio::new();
    let transport = Arc::new(GattTransport::new(radio.clone()));
    let listener = RecordingListener::new();
    transport
        .connect(&device(), listener.clone())
        .expect("connect issued");
    establish(&transport, mtu);
    (radio, transport, listener)
}
