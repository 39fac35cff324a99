use uuid::Uuid;

use crate::api::central::DeviceId;
use crate::api::service::Service;

/// Callbacks raised by the radio stack on the central side.
///
/// Failures are carried as the stack's own description.
#[derive(Debug, Clone)]
pub enum CentralEvent {
    StateUpdate {
        state: CentralState,
    },
    DeviceDiscovered {
        device: DeviceId,
        services: Vec<Uuid>,
    },
    ScanFailed {
        error: String,
    },
    DeviceConnected {
        device: DeviceId,
    },
    DeviceDisconnected {
        device: DeviceId,
    },
    ConnectionFailed {
        device: DeviceId,
        error: Option<String>,
    },
    ServicesDiscovered {
        device: DeviceId,
        services: Result<Vec<Service>, String>,
    },
    CharacteristicRead {
        device: DeviceId,
        characteristic: Uuid,
        value: Result<Vec<u8>, String>,
    },
    CharacteristicWritten {
        device: DeviceId,
        characteristic: Uuid,
        result: Result<(), String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CentralState {
    Unknown = 0,
    PoweredOn = 1,
    PoweredOff = 2,
}
