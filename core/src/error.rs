// Error taxonomy for the serial transport
//
// Setup errors end a connection attempt and reach the consumer through
// on_connect_error. Runtime errors happen after the link became ready and
// reach the consumer through on_io_error. Usage errors are returned
// synchronously to the caller and are never queued.

use thiserror::Error;

use crate::gatt::{CharacteristicProperties, GattStatus};

/// Coarse classification of a [`SerialError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection establishment failed; terminal for the attempt.
    Setup,
    /// Link loss or write failure after the link became ready.
    Runtime,
    /// API misuse by the caller.
    Usage,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerialError {
    // ------------------------------------------------------------------
    // Usage
    // ------------------------------------------------------------------
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("not on the delivery thread")]
    NotOnDeliveryThread,
    #[error("connection setup failed: {0}")]
    ConnectionSetupFailed(String),

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------
    #[error("discoverServices failed")]
    DiscoverServicesFailed,
    #[error("link status {0}")]
    LinkStatus(GattStatus),
    #[error("no serial profile found")]
    NoSerialProfile,
    #[error("multiple write characteristics ({0}/{1})")]
    MultipleWriteCharacteristics(CharacteristicProperties, CharacteristicProperties),
    #[error("no write characteristic ({0}/{1})")]
    NoWriteCharacteristic(CharacteristicProperties, CharacteristicProperties),
    #[error("write characteristic not writable")]
    WriteNotWritable,
    #[error("no notification for read characteristic")]
    NotificationRejected,
    #[error("no CCCD descriptor for read characteristic")]
    MissingCccd,
    #[error("no indication/notification for read characteristic ({0})")]
    NoIndicationOrNotification(CharacteristicProperties),
    #[error("read characteristic CCCD descriptor not writable")]
    CccdNotWritable,
    #[error("write descriptor failed")]
    DescriptorWriteFailed,
    #[error("pairing request")]
    PairingRequested,

    // ------------------------------------------------------------------
    // Runtime
    // ------------------------------------------------------------------
    #[error("link lost: status {0}")]
    LinkLost(GattStatus),
    #[error("write failed")]
    WriteFailed,
    #[error("background disconnect")]
    BackgroundDisconnect,
}

impl SerialError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SerialError::AlreadyConnected
            | SerialError::NotConnected
            | SerialError::NotOnDeliveryThread
            | SerialError::ConnectionSetupFailed(_) => ErrorKind::Usage,
            SerialError::LinkLost(_)
            | SerialError::WriteFailed
            | SerialError::BackgroundDisconnect => ErrorKind::Runtime,
            _ => ErrorKind::Setup,
        }
    }
}
