use uuid::Uuid;

use crate::api::central::DeviceId;

#[derive(Debug, Clone)]
pub enum PeripheralEvent {
    StateUpdate {
        is_powered: bool,
    },
    AdvertisingStarted,
    AdvertisingFailed {
        error: String,
    },
    ConnectionStateChanged {
        device: DeviceId,
        connected: bool,
    },
    ReadRequest {
        request: PeripheralRequest,
        offset: u64,
    },
    /// `value` is `None` when the stack delivered a request without payload.
    WriteRequest {
        request: PeripheralRequest,
        value: Option<Vec<u8>>,
        offset: u64,
    },
}

/// Where an inbound request came from; responses are addressed to
/// `(client, request_id)`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PeripheralRequest {
    pub client: DeviceId,
    pub request_id: u32,
    pub service: Uuid,
    pub characteristic: Uuid,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RequestResponse {
    Success,
    InvalidHandle,
    RequestNotSupported,
    InvalidOffset,
    UnlikelyError,
}
