/// GATT data model shared by the radio contract, the profile selector and
/// the transport.
///
/// The core never talks to a BLE stack directly; the embedding platform
/// translates its native service/characteristic objects into these types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client Characteristic Configuration Descriptor
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_00805F9B34FB);

/// Nordic UART service (also used by micro:bit and Adafruit boards)
pub const NORDIC_UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6E40_0001_B5A3_F393_E0A9_E50E24DCCA9E);

/// Nordic UART characteristic 2: read on micro:bit, write on Adafruit
pub const NORDIC_UART_RW2_UUID: Uuid = Uuid::from_u128(0x6E40_0002_B5A3_F393_E0A9_E50E24DCCA9E);

/// Nordic UART characteristic 3
pub const NORDIC_UART_RW3_UUID: Uuid = Uuid::from_u128(0x6E40_0003_B5A3_F393_E0A9_E50E24DCCA9E);

/// CCCD value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value enabling indications
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// ATT header bytes subtracted from the MTU to get the usable payload
pub const ATT_OVERHEAD: u16 = 3;

// ============================================================================
// PROPERTIES
// ============================================================================

/// Characteristic property bitmask, same bit values as the ATT characteristic declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_NO_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// WRITE or WRITE_NO_RESPONSE
    pub const fn is_writable(self) -> bool {
        self.intersects(Self(Self::WRITE.0 | Self::WRITE_NO_RESPONSE.0))
    }
}

impl std::ops::BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ATTRIBUTES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattDescriptor {
    pub uuid: Uuid,
    pub handle: u16,
}

/// A characteristic as discovered on the peer.
///
/// Two characteristics are the same attribute iff their handles match; the
/// UUID alone is not unique across services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub handle: u16,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<GattDescriptor>,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, handle: u16, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            handle,
            properties,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, uuid: Uuid, handle: u16) -> Self {
        self.descriptors.push(GattDescriptor { uuid, handle });
        self
    }

    /// Attach a CCCD at `handle + 1`, the usual layout on real peripherals
    pub fn with_cccd(self) -> Self {
        let handle = self.handle.wrapping_add(1);
        self.with_descriptor(CCCD_UUID, handle)
    }

    pub fn descriptor(&self, uuid: &Uuid) -> Option<&GattDescriptor> {
        self.descriptors.iter().find(|d| d.uuid == *uuid)
    }

    pub fn same_attribute(&self, other: &GattCharacteristic) -> bool {
        self.handle == other.handle
    }

    /// Write type used for outbound chunks on this characteristic
    pub fn preferred_write_type(&self) -> WriteType {
        if self.properties.contains(CharacteristicProperties::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: GattCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    pub fn characteristic(&self, uuid: &Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

// ============================================================================
// STATUS AND LINK STATE
// ============================================================================

/// Raw status code reported by the radio stack. Zero is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattStatus(i32);

impl GattStatus {
    pub const SUCCESS: Self = Self(0);
    /// Generic error, in practice mostly a connection timeout
    pub const GATT_ERROR: Self = Self(133);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Link state reported by the link-state-changed callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    /// Connecting/disconnecting and vendor specific values
    Other(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

// ============================================================================
// DEVICE
// ============================================================================

/// Identifier of a discovered peripheral, produced by the (external) scanner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub address: String,
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_writable() {
        assert!(CharacteristicProperties::WRITE.is_writable());
        assert!(CharacteristicProperties::WRITE_NO_RESPONSE.is_writable());
        assert!(!(CharacteristicProperties::READ | CharacteristicProperties::NOTIFY).is_writable());
    }

    #[test]
    fn test_properties_contains() {
        let props = CharacteristicProperties::NOTIFY | CharacteristicProperties::INDICATE;
        assert!(props.contains(CharacteristicProperties::INDICATE));
        assert!(!props.contains(CharacteristicProperties::WRITE));
        assert_eq!(props.bits(), 0x30);
    }

    #[test]
    fn test_preferred_write_type() {
        let with_response = GattCharacteristic::new(
            NORDIC_UART_RW2_UUID,
            0x10,
            CharacteristicProperties::WRITE | CharacteristicProperties::WRITE_NO_RESPONSE,
        );
        assert_eq!(with_response.preferred_write_type(), WriteType::WithResponse);

        let without = GattCharacteristic::new(
            NORDIC_UART_RW2_UUID,
            0x10,
            CharacteristicProperties::WRITE_NO_RESPONSE,
        );
        assert_eq!(without.preferred_write_type(), WriteType::WithoutResponse);
    }

    #[test]
    fn test_cccd_lookup() {
        let c = GattCharacteristic::new(NORDIC_UART_RW3_UUID, 0x20, CharacteristicProperties::NOTIFY)
            .with_cccd();
        let cccd = c.descriptor(&CCCD_UUID).expect("cccd");
        assert_eq!(cccd.handle, 0x21);
    }

    #[test]
    fn test_device_display_name_falls_back_to_address() {
        let device = DeviceHandle::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(device.display_name(), "AA:BB:CC:DD:EE:FF");
        let named = device.with_name("micro:bit");
        assert_eq!(named.display_name(), "micro:bit");
    }

    #[test]
    fn test_uuid_constants() {
        assert_eq!(
            NORDIC_UART_SERVICE_UUID.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(CCCD_UUID.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
    }
}
