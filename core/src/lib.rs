// GattSerial Core: serial byte streams over BLE GATT
#![allow(clippy::empty_line_after_doc_comments)]
//
// A transport turns one GATT link into a socket-like object, a session
// service relays its events to a consumer that may come and go. The radio
// stack and the consumer are both behind traits, so everything here runs
// without BLE hardware.

pub mod bus;
pub mod config;
pub mod error;
pub mod gatt;
pub mod looper;
pub mod profile;
pub mod radio;
pub mod service;
pub mod transport;

pub use bus::{EventQueues, ReadCoalescer, SerialEvent, SerialListener};
pub use config::{payload_size_for_mtu, ConfigError, SerialConfig};
pub use error::{ErrorKind, SerialError};
pub use gatt::{
    CharacteristicProperties, DeviceHandle, GattCharacteristic, GattDescriptor, GattService,
    GattStatus, LinkState, WriteType,
};
pub use looper::{DeliveryLoop, ManualLoop, Task, ThreadLoop};
pub use profile::{DeviceProfile, NordicUartProfile, ProfileError, ProfileSelector};
pub use radio::{GattCallback, GattRadio, RadioError};
pub use service::{ForegroundNotifier, SerialService};
pub use transport::{GattTransport, TransportListener, TransportState};
