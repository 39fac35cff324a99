use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::Result;
use crate::api::characteristic::CharacteristicWriteType;

/// Radio-stack operations available to a central.
///
/// Every method only triggers the operation. Outcomes arrive later as
/// [`CentralEvent`](crate::api::central_event::CentralEvent)s on the channel
/// the stack was created with.
#[async_trait]
pub trait CentralManager: Send + Sync {
    async fn is_powered(&self) -> Result<bool>;

    async fn start_scan(&self, filter: ScanFilter) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    async fn connect(&self, device: &DeviceId) -> Result<()>;

    /// Drops the link and releases the connection handle.
    async fn disconnect(&self, device: &DeviceId) -> Result<()>;

    async fn discover_services(&self, device: &DeviceId) -> Result<()>;

    async fn read(&self, device: &DeviceId, service: Uuid, characteristic: Uuid) -> Result<()>;

    async fn write(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        write_type: CharacteristicWriteType,
    ) -> Result<()>;
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanFilter {
    pub services: Vec<Uuid>,
}

impl ScanFilter {
    pub fn service(uuid: Uuid) -> Self {
        ScanFilter {
            services: vec![uuid],
        }
    }

    /// An empty filter matches everything.
    pub fn matches(&self, advertised: &[Uuid]) -> bool {
        self.services.is_empty() || self.services.iter().any(|uuid| advertised.contains(uuid))
    }
}

/// Identifier of a remote device, typically its hardware address.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        DeviceId::new(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::service::SERVICE_UUID;

    #[test]
    fn filter_matches_advertised_service() {
        let filter = ScanFilter::service(SERVICE_UUID);
        assert!(filter.matches(&[Uuid::nil(), SERVICE_UUID]));
        assert!(!filter.matches(&[Uuid::nil()]));
        assert!(ScanFilter::default().matches(&[]));
    }
}
