// Simulated Nordic UART peripheral
//
// Implements the radio contract in-process: every issued operation is
// answered from a worker thread, the way a platform BLE stack answers from
// its callback thread. Written data is echoed back as notifications.

use gattserial_core::gatt::{NORDIC_UART_RW2_UUID, NORDIC_UART_RW3_UUID, NORDIC_UART_SERVICE_UUID};
use gattserial_core::{
    CharacteristicProperties, DeviceHandle, GattCallback, GattCharacteristic, GattDescriptor,
    GattRadio, GattService, GattStatus, LinkState, RadioError, WriteType,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc;
use tracing::{debug, trace};

const RX_HANDLE: u16 = 0x0E;
const TX_HANDLE: u16 = 0x10;

enum SimEvent {
    LinkUp,
    LinkDown,
    Services,
    Mtu(u16),
    Descriptor(GattCharacteristic, GattDescriptor),
    Written(GattCharacteristic, Vec<u8>),
}

pub struct SimulatedPeripheral {
    peripheral_mtu: u16,
    callback: Arc<Mutex<Option<Weak<dyn GattCallback>>>>,
    sender: Option<mpsc::UnboundedSender<SimEvent>>,
    worker: Option<(ThreadId, JoinHandle<()>)>,
}

impl SimulatedPeripheral {
    pub fn spawn(peripheral_mtu: u16) -> std::io::Result<Arc<Self>> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<SimEvent>();
        let callback: Arc<Mutex<Option<Weak<dyn GattCallback>>>> = Arc::new(Mutex::new(None));
        let worker_callback = callback.clone();
        let handle = thread::Builder::new()
            .name("sim-radio".to_string())
            .spawn(move || {
                while let Some(event) = receiver.blocking_recv() {
                    let target = worker_callback.lock().as_ref().and_then(Weak::upgrade);
                    if let Some(target) = target {
                        answer(target.as_ref(), event);
                    }
                }
            })?;
        let worker_id = handle.thread().id();
        Ok(Arc::new(Self {
            peripheral_mtu,
            callback,
            sender: Some(sender),
            worker: Some((worker_id, handle)),
        }))
    }

    /// Route answers to `target`
    pub fn bind<T: GattCallback + 'static>(&self, target: &Arc<T>) {
        let target: Arc<dyn GattCallback> = target.clone();
        *self.callback.lock() = Some(Arc::downgrade(&target));
    }

    pub fn services() -> Vec<GattService> {
        vec![GattService::new(NORDIC_UART_SERVICE_UUID)
            .with_characteristic(rx_characteristic())
            .with_characteristic(tx_characteristic())]
    }

    fn send(&self, event: SimEvent) -> Result<(), RadioError> {
        self.sender
            .as_ref()
            .ok_or_else(|| RadioError::Rejected("radio stopped".into()))?
            .send(event)
            .map_err(|_| RadioError::Rejected("radio stopped".into()))
    }
}

/// Characteristic the central writes to
fn rx_characteristic() -> GattCharacteristic {
    GattCharacteristic::new(
        NORDIC_UART_RW2_UUID,
        RX_HANDLE,
        CharacteristicProperties::WRITE | CharacteristicProperties::WRITE_NO_RESPONSE,
    )
}

/// Characteristic the peripheral notifies on
fn tx_characteristic() -> GattCharacteristic {
    GattCharacteristic::new(NORDIC_UART_RW3_UUID, TX_HANDLE, CharacteristicProperties::NOTIFY)
        .with_cccd()
}

fn answer(target: &dyn GattCallback, event: SimEvent) {
    match event {
        SimEvent::LinkUp => target.on_connection_state_change(GattStatus::SUCCESS, LinkState::Connected),
        SimEvent::LinkDown => {
            target.on_connection_state_change(GattStatus::SUCCESS, LinkState::Disconnected)
        }
        SimEvent::Services => {
            target.on_services_discovered(GattStatus::SUCCESS, SimulatedPeripheral::services())
        }
        SimEvent::Mtu(mtu) => target.on_mtu_changed(mtu, GattStatus::SUCCESS),
        SimEvent::Descriptor(characteristic, descriptor) => {
            target.on_descriptor_write(&characteristic, &descriptor, GattStatus::SUCCESS)
        }
        SimEvent::Written(characteristic, data) => {
            target.on_characteristic_write(&characteristic, GattStatus::SUCCESS);
            trace!("echo {}", hex::encode(&data));
            target.on_characteristic_changed(&tx_characteristic(), data);
        }
    }
}

impl GattRadio for SimulatedPeripheral {
    fn open_link(&self, device: &DeviceHandle) -> Result<(), RadioError> {
        debug!("sim: link to {}", device);
        self.send(SimEvent::LinkUp)
    }

    fn discover_services(&self) -> Result<(), RadioError> {
        self.send(SimEvent::Services)
    }

    fn request_mtu(&self, mtu: u16) -> Result<(), RadioError> {
        self.send(SimEvent::Mtu(mtu.min(self.peripheral_mtu)))
    }

    fn set_characteristic_notification(
        &self,
        characteristic: &GattCharacteristic,
        enable: bool,
    ) -> Result<(), RadioError> {
        debug!("sim: notifications {} on {}", enable, characteristic.uuid);
        Ok(())
    }

    fn write_descriptor(
        &self,
        characteristic: &GattCharacteristic,
        descriptor: &GattDescriptor,
        _value: &[u8],
    ) -> Result<(), RadioError> {
        self.send(SimEvent::Descriptor(characteristic.clone(), descriptor.clone()))
    }

    fn write_characteristic(
        &self,
        characteristic: &GattCharacteristic,
        data: &[u8],
        _write_type: WriteType,
    ) -> Result<(), RadioError> {
        self.send(SimEvent::Written(characteristic.clone(), data.to_vec()))
    }

    fn close_link(&self) {
        debug!("sim: link closed");
        let _ = self.send(SimEvent::LinkDown);
    }
}

impl Drop for SimulatedPeripheral {
    fn drop(&mut self) {
        self.sender.take();
        if let Some((id, handle)) = self.worker.take() {
            if thread::current().id() != id {
                let _ = handle.join();
            }
        }
    }
}
