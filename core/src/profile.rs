/// Device-family profiles and the profile selector
///
/// A profile decides which characteristic of a recognized service carries
/// inbound data ("read") and which takes outbound data ("write"). Families
/// with nonstandard sequencing override the hook methods; everything else
/// uses the defaults. The selected profile is stored in the connection and
/// called directly on every callback, never re-resolved.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::error::SerialError;
use crate::gatt::{
    CharacteristicProperties, GattCharacteristic, GattDescriptor, GattService, GattStatus,
    NORDIC_UART_RW2_UUID, NORDIC_UART_RW3_UUID, NORDIC_UART_SERVICE_UUID,
};
use crate::radio::GattRadio;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("no serial profile found")]
    Unresolved,
    #[error("multiple write characteristics ({0}/{1})")]
    MultipleWriteCharacteristics(CharacteristicProperties, CharacteristicProperties),
    #[error("no write characteristic ({0}/{1})")]
    NoWriteCharacteristic(CharacteristicProperties, CharacteristicProperties),
}

impl From<ProfileError> for SerialError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::Unresolved => SerialError::NoSerialProfile,
            ProfileError::MultipleWriteCharacteristics(a, b) => {
                SerialError::MultipleWriteCharacteristics(a, b)
            }
            ProfileError::NoWriteCharacteristic(a, b) => SerialError::NoWriteCharacteristic(a, b),
        }
    }
}

/// The resolved read/write pair
#[derive(Debug, Clone)]
pub struct CharacteristicPair {
    pub read: GattCharacteristic,
    pub write: GattCharacteristic,
}

/// Behavior of one device family.
pub trait DeviceProfile: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Service that identifies this family
    fn service_uuid(&self) -> Uuid;

    /// Pick the read/write pair inside the claimed service
    fn resolve(&self, service: &GattService) -> Result<CharacteristicPair, ProfileError>;

    fn on_descriptor_write(
        &self,
        _radio: &dyn GattRadio,
        _descriptor: &GattDescriptor,
        _status: GattStatus,
    ) {
    }

    fn on_characteristic_changed(
        &self,
        _radio: &dyn GattRadio,
        _characteristic: &GattCharacteristic,
        _value: &[u8],
    ) {
    }

    fn on_characteristic_write(
        &self,
        _radio: &dyn GattRadio,
        _characteristic: &GattCharacteristic,
        _status: GattStatus,
    ) {
    }

    /// Whether the next queued chunk may be transmitted now
    fn can_write(&self) -> bool {
        true
    }

    /// Release whatever the family installed (subscriptions, credits, ...)
    fn disconnect(&self) {}
}

// ============================================================================
// NORDIC UART
// ============================================================================

/// Nordic UART service: two characteristics, one of them writable.
///
/// micro:bit and Adafruit boards swap the roles of RW2 and RW3, so the role
/// is decided by the WRITE property alone.
#[derive(Debug, Default)]
pub struct NordicUartProfile;

impl DeviceProfile for NordicUartProfile {
    fn name(&self) -> &'static str {
        "nordic-uart"
    }

    fn service_uuid(&self) -> Uuid {
        NORDIC_UART_SERVICE_UUID
    }

    fn resolve(&self, service: &GattService) -> Result<CharacteristicPair, ProfileError> {
        let (rw2, rw3) = match (
            service.characteristic(&NORDIC_UART_RW2_UUID),
            service.characteristic(&NORDIC_UART_RW3_UUID),
        ) {
            (Some(rw2), Some(rw3)) => (rw2, rw3),
            _ => return Err(ProfileError::Unresolved),
        };

        let rw2_write = rw2.properties.contains(CharacteristicProperties::WRITE);
        let rw3_write = rw3.properties.contains(CharacteristicProperties::WRITE);
        debug!(
            "characteristic properties {}/{}",
            rw2.properties, rw3.properties
        );

        match (rw2_write, rw3_write) {
            (true, true) => Err(ProfileError::MultipleWriteCharacteristics(
                rw2.properties,
                rw3.properties,
            )),
            (true, false) => Ok(CharacteristicPair {
                write: rw2.clone(),
                read: rw3.clone(),
            }),
            (false, true) => Ok(CharacteristicPair {
                write: rw3.clone(),
                read: rw2.clone(),
            }),
            (false, false) => Err(ProfileError::NoWriteCharacteristic(
                rw2.properties,
                rw3.properties,
            )),
        }
    }
}

// ============================================================================
// SELECTOR
// ============================================================================

/// Outcome of a successful selection
#[derive(Debug, Clone)]
pub struct Selection {
    pub profile: Arc<dyn DeviceProfile>,
    pub pair: CharacteristicPair,
}

/// Ordered list of known device families.
///
/// The first discovered service whose UUID matches a family claims the
/// service set; that family's resolution result is final.
#[derive(Debug, Clone)]
pub struct ProfileSelector {
    families: Vec<Arc<dyn DeviceProfile>>,
}

impl Default for ProfileSelector {
    fn default() -> Self {
        Self::new(vec![Arc::new(NordicUartProfile)])
    }
}

impl ProfileSelector {
    pub fn new(families: Vec<Arc<dyn DeviceProfile>>) -> Self {
        Self { families }
    }

    /// Selector with no families: every service set is unresolved
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_family(mut self, family: Arc<dyn DeviceProfile>) -> Self {
        self.families.push(family);
        self
    }

    pub fn families(&self) -> impl Iterator<Item = &Arc<dyn DeviceProfile>> {
        self.families.iter()
    }

    pub fn select(&self, services: &[GattService]) -> Result<Selection, ProfileError> {
        for service in services {
            let claimed = self
                .families
                .iter()
                .find(|family| family.service_uuid() == service.uuid);
            if let Some(family) = claimed {
                debug!("service {} claimed by {}", service.uuid, family.name());
                let pair = family.resolve(service)?;
                return Ok(Selection {
                    profile: Arc::clone(family),
                    pair,
                });
            }
        }
        Err(ProfileError::Unresolved)
    }
}
