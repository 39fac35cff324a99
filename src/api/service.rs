use uuid::{Uuid, uuid};

use crate::api::characteristic::Characteristic;

/// Service advertised by the peripheral and scanned for by the central.
pub const SERVICE_UUID: Uuid = uuid!("a1bf5691-1851-4d0c-bddd-cd5c9f516595");

/// The single read/write characteristic inside [`SERVICE_UUID`].
pub const CHARACTERISTIC_UUID: Uuid = uuid!("03f06708-4119-4841-893e-4de78b22c3d4");

/// Which service and characteristic both roles agree on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ServiceIdentity {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl ServiceIdentity {
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        ServiceIdentity {
            service,
            characteristic,
        }
    }

    /// GATT service exposing one readable and writable characteristic.
    pub fn service_definition(&self) -> Service {
        Service {
            uuid: self.service,
            primary: true,
            characteristics: vec![Characteristic {
                uuid: self.characteristic,
                ..Default::default()
            }],
        }
    }

    /// Whether `services` contains this identity's service with its characteristic.
    pub fn is_exposed_by(&self, services: &[Service]) -> bool {
        services
            .iter()
            .filter(|service| service.uuid == self.service)
            .any(|service| service.characteristic(&self.characteristic).is_some())
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        ServiceIdentity::new(SERVICE_UUID, CHARACTERISTIC_UUID)
    }
}

#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct Service {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_is_exposed() {
        let identity = ServiceIdentity::default();
        let service = identity.service_definition();
        assert!(service.primary);
        assert!(identity.is_exposed_by(&[service]));
    }

    #[test]
    fn missing_characteristic_is_not_exposed() {
        let identity = ServiceIdentity::default();
        let service = Service {
            uuid: SERVICE_UUID,
            primary: true,
            characteristics: Vec::new(),
        };
        assert!(!identity.is_exposed_by(&[service]));
        assert!(!identity.is_exposed_by(&[]));
    }
}
