use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::Result;
use crate::api::central::DeviceId;
use crate::api::peripheral_event::RequestResponse;
use crate::api::service::Service;

/// Radio-stack operations available to a peripheral.
///
/// Advertising outcomes, connection changes and inbound requests arrive as
/// [`PeripheralEvent`](crate::api::peripheral_event::PeripheralEvent)s.
#[async_trait]
pub trait PeripheralManager: Send + Sync {
    async fn is_powered(&self) -> Result<bool>;

    async fn is_advertising(&self) -> Result<bool>;

    async fn start_advertising(&self, settings: &AdvertiseSettings, uuids: &[Uuid]) -> Result<()>;

    async fn stop_advertising(&self) -> Result<()>;

    /// Opens the GATT server if needed and registers `service` on it.
    async fn add_service(&self, service: &Service) -> Result<()>;

    /// Unregisters every service and closes the GATT server.
    async fn remove_services(&self) -> Result<()>;

    async fn send_response(
        &self,
        device: &DeviceId,
        request_id: u32,
        response: RequestResponse,
        offset: u64,
        value: Option<Vec<u8>>,
    ) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AdvertiseMode {
    #[default]
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    /// `None` advertises until stopped.
    pub timeout: Option<Duration>,
    pub connectable: bool,
    pub local_name: Option<String>,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        AdvertiseSettings {
            mode: AdvertiseMode::LowPower,
            timeout: None,
            connectable: true,
            local_name: None,
        }
    }
}
