/// Radio stack contracts
///
/// `GattRadio` is what the transport calls into (one instance per link).
/// `GattCallback` is what the platform calls back, typically from its BLE
/// callback thread. Both sides are expected to be implemented by native
/// glue code; the core logic here is testable without BLE hardware.

use thiserror::Error;

use crate::gatt::{
    DeviceHandle, GattCharacteristic, GattDescriptor, GattService, GattStatus, LinkState,
    WriteType,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    /// The stack refused to issue the operation (busy, invalid handle, ...)
    #[error("operation rejected: {0}")]
    Rejected(String),
    /// The platform does not implement the operation at all
    #[error("operation not supported")]
    Unsupported,
}

/// Outbound operations towards the radio stack.
///
/// Every method only *issues* the operation; completion arrives later
/// through the matching [`GattCallback`] method. Implementations must not
/// invoke a callback from inside these methods: the transport issues them
/// while holding its connection lock.
#[cfg_attr(test, mockall::automock)]
pub trait GattRadio: Send + Sync {
    /// Open the link to `device`; continues in `on_connection_state_change`
    fn open_link(&self, device: &DeviceHandle) -> Result<(), RadioError>;

    /// Continues in `on_services_discovered`
    fn discover_services(&self) -> Result<(), RadioError>;

    /// Continues in `on_mtu_changed`. `Unsupported` on stacks without
    /// MTU exchange.
    fn request_mtu(&self, mtu: u16) -> Result<(), RadioError>;

    /// Local (synchronous) routing of notifications for `characteristic`
    fn set_characteristic_notification(
        &self,
        characteristic: &GattCharacteristic,
        enable: bool,
    ) -> Result<(), RadioError>;

    /// Continues in `on_descriptor_write`
    fn write_descriptor(
        &self,
        characteristic: &GattCharacteristic,
        descriptor: &GattDescriptor,
        value: &[u8],
    ) -> Result<(), RadioError>;

    /// Continues in `on_characteristic_write`
    fn write_characteristic(
        &self,
        characteristic: &GattCharacteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), RadioError>;

    /// Disconnect and release the link. Must tolerate an already closed link.
    fn close_link(&self);

    /// Start delivering pairing / bond / disconnect-request broadcasts
    fn subscribe_system_events(&self) -> Result<(), RadioError> {
        Ok(())
    }

    /// Stop delivering broadcasts. Must tolerate not being subscribed.
    fn unsubscribe_system_events(&self) {}
}

/// Inbound callbacks from the radio stack.
pub trait GattCallback: Send + Sync {
    fn on_connection_state_change(&self, status: GattStatus, new_state: LinkState);

    fn on_services_discovered(&self, status: GattStatus, services: Vec<GattService>);

    fn on_mtu_changed(&self, mtu: u16, status: GattStatus);

    fn on_descriptor_write(
        &self,
        characteristic: &GattCharacteristic,
        descriptor: &GattDescriptor,
        status: GattStatus,
    );

    fn on_characteristic_changed(&self, characteristic: &GattCharacteristic, value: Vec<u8>);

    fn on_characteristic_write(&self, characteristic: &GattCharacteristic, status: GattStatus);

    // System broadcasts (only delivered while subscribed)

    /// `variant` is the platform's pairing variant code, if known
    fn on_pairing_request(&self, device: &DeviceHandle, variant: Option<i32>);

    fn on_bond_state_changed(&self, device: &DeviceHandle, previous: i32, current: i32);

    /// The user asked to disconnect from outside the consumer (e.g. from a
    /// foreground notification action)
    fn on_disconnect_requested(&self);
}
