//! In-process radio stack linking one central to one peripheral.
//!
//! Both halves share a simulated air interface: the central's scan sees the
//! peripheral's advertisement, its reads and writes become requests on the
//! peripheral side and the peripheral's responses come back as completions.
//! Read responses are capped at one transport unit; longer values are
//! fetched with follow-up reads at increasing offsets and reassembled before
//! the central sees them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::sync::mpsc::{self, Receiver, Sender};
use uuid::Uuid;

use crate::api::central::{CentralManager, DeviceId, ScanFilter};
use crate::api::central_event::CentralEvent;
use crate::api::characteristic::CharacteristicWriteType;
use crate::api::peripheral::{AdvertiseSettings, PeripheralManager};
use crate::api::peripheral_event::{PeripheralEvent, PeripheralRequest, RequestResponse};
use crate::api::service::Service;
use crate::{Error, ErrorType, Result};

pub const CENTRAL_ADDRESS: &str = "C0:00:00:00:00:01";
pub const PERIPHERAL_ADDRESS: &str = "P0:00:00:00:00:02";

/// Read payload carried by one response with the default ATT MTU of 23.
pub const DEFAULT_MTU_PAYLOAD: usize = 22;

enum Outgoing {
    Central(CentralEvent),
    Peripheral(PeripheralEvent),
}

#[derive(Debug)]
enum Pending {
    Read {
        service: Uuid,
        characteristic: Uuid,
        received: Vec<u8>,
    },
    Write {
        characteristic: Uuid,
    },
}

#[derive(Debug, Default)]
struct AirState {
    scanning: Option<ScanFilter>,
    advertising: Option<Vec<Uuid>>,
    services: Vec<Service>,
    connected: bool,
    next_request_id: u32,
    pending: HashMap<u32, Pending>,
}

impl AirState {
    fn next_request_id(&mut self) -> u32 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }

    fn discovery(&self) -> Option<Outgoing> {
        let filter = self.scanning.as_ref()?;
        let advertised = self.advertising.as_ref()?;
        if !filter.matches(advertised) {
            return None;
        }
        Some(Outgoing::Central(CentralEvent::DeviceDiscovered {
            device: DeviceId::from(PERIPHERAL_ADDRESS),
            services: advertised.clone(),
        }))
    }

    fn drop_link(&mut self) -> Vec<Outgoing> {
        if !self.connected {
            return Vec::new();
        }
        self.connected = false;
        self.pending.clear();
        vec![
            Outgoing::Central(CentralEvent::DeviceDisconnected {
                device: DeviceId::from(PERIPHERAL_ADDRESS),
            }),
            Outgoing::Peripheral(PeripheralEvent::ConnectionStateChanged {
                device: DeviceId::from(CENTRAL_ADDRESS),
                connected: false,
            }),
        ]
    }
}

struct Air {
    central_tx: Sender<CentralEvent>,
    peripheral_tx: Sender<PeripheralEvent>,
    mtu_payload: usize,
    state: Mutex<AirState>,
}

impl Air {
    fn lock(&self) -> Result<MutexGuard<'_, AirState>> {
        self.state
            .lock()
            .map_err(|_| Error::from_string("Loopback state poisoned".to_string(), ErrorType::Radio))
    }

    /// Queues events without waiting: the central's event task calls back
    /// into this radio and must never block on its own channel.
    fn emit(&self, outgoing: Vec<Outgoing>) {
        for event in outgoing {
            let sent = match event {
                Outgoing::Central(event) => {
                    trace!("Loopback -> central: {event:?}");
                    self.central_tx.try_send(event).map_err(|error| error.to_string())
                }
                Outgoing::Peripheral(event) => {
                    trace!("Loopback -> peripheral: {event:?}");
                    self.peripheral_tx.try_send(event).map_err(|error| error.to_string())
                }
            };
            if let Err(error) = sent {
                warn!("Loopback event dropped: {error}");
            }
        }
    }
}

fn not_connected() -> Error {
    Error::from_string("Not connected".to_string(), ErrorType::Radio)
}

/// Both ends of a loopback link and the event streams they report on.
pub struct LoopbackLink {
    pub central: Arc<LoopbackCentral>,
    pub central_events: Receiver<CentralEvent>,
    pub peripheral: Arc<LoopbackPeripheral>,
    pub peripheral_events: Receiver<PeripheralEvent>,
}

impl LoopbackLink {
    pub fn new(event_buffer: usize) -> Self {
        Self::with_mtu_payload(event_buffer, DEFAULT_MTU_PAYLOAD)
    }

    pub fn with_mtu_payload(event_buffer: usize, mtu_payload: usize) -> Self {
        let (central_tx, central_events) = mpsc::channel(event_buffer);
        let (peripheral_tx, peripheral_events) = mpsc::channel(event_buffer);
        let air = Arc::new(Air {
            central_tx,
            peripheral_tx,
            mtu_payload: mtu_payload.max(1),
            state: Mutex::new(AirState::default()),
        });
        LoopbackLink {
            central: Arc::new(LoopbackCentral { air: air.clone() }),
            central_events,
            peripheral: Arc::new(LoopbackPeripheral { air }),
            peripheral_events,
        }
    }
}

pub struct LoopbackCentral {
    air: Arc<Air>,
}

#[async_trait]
impl CentralManager for LoopbackCentral {
    async fn is_powered(&self) -> Result<bool> {
        Ok(true)
    }

    async fn start_scan(&self, filter: ScanFilter) -> Result<()> {
        let outgoing = {
            let mut state = self.air.lock()?;
            state.scanning = Some(filter);
            state.discovery()
        };
        self.air.emit(outgoing.into_iter().collect());
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.air.lock()?.scanning = None;
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<()> {
        let outgoing = {
            let mut state = self.air.lock()?;
            if device.as_str() != PERIPHERAL_ADDRESS || state.services.is_empty() {
                vec![Outgoing::Central(CentralEvent::ConnectionFailed {
                    device: device.clone(),
                    error: Some(format!("{device} is not accepting connections")),
                })]
            } else if state.connected {
                Vec::new()
            } else {
                state.connected = true;
                vec![
                    Outgoing::Peripheral(PeripheralEvent::ConnectionStateChanged {
                        device: DeviceId::from(CENTRAL_ADDRESS),
                        connected: true,
                    }),
                    Outgoing::Central(CentralEvent::DeviceConnected {
                        device: device.clone(),
                    }),
                ]
            }
        };
        self.air.emit(outgoing);
        Ok(())
    }

    async fn disconnect(&self, _device: &DeviceId) -> Result<()> {
        let outgoing = self.air.lock()?.drop_link();
        self.air.emit(outgoing);
        Ok(())
    }

    async fn discover_services(&self, device: &DeviceId) -> Result<()> {
        let services = {
            let state = self.air.lock()?;
            if !state.connected {
                return Err(not_connected());
            }
            state.services.clone()
        };
        self.air.emit(vec![Outgoing::Central(CentralEvent::ServicesDiscovered {
            device: device.clone(),
            services: Ok(services),
        })]);
        Ok(())
    }

    async fn read(&self, _device: &DeviceId, service: Uuid, characteristic: Uuid) -> Result<()> {
        let request_id = {
            let mut state = self.air.lock()?;
            if !state.connected {
                return Err(not_connected());
            }
            let request_id = state.next_request_id();
            state.pending.insert(
                request_id,
                Pending::Read {
                    service,
                    characteristic,
                    received: Vec::new(),
                },
            );
            request_id
        };
        self.air.emit(vec![read_request(request_id, service, characteristic, 0)]);
        Ok(())
    }

    async fn write(
        &self,
        _device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        _write_type: CharacteristicWriteType,
    ) -> Result<()> {
        let request_id = {
            let mut state = self.air.lock()?;
            if !state.connected {
                return Err(not_connected());
            }
            let request_id = state.next_request_id();
            state
                .pending
                .insert(request_id, Pending::Write { characteristic });
            request_id
        };
        self.air.emit(vec![Outgoing::Peripheral(PeripheralEvent::WriteRequest {
            request: PeripheralRequest {
                client: DeviceId::from(CENTRAL_ADDRESS),
                request_id,
                service,
                characteristic,
            },
            value: Some(data.to_vec()),
            offset: 0,
        })]);
        Ok(())
    }
}

fn read_request(request_id: u32, service: Uuid, characteristic: Uuid, offset: u64) -> Outgoing {
    Outgoing::Peripheral(PeripheralEvent::ReadRequest {
        request: PeripheralRequest {
            client: DeviceId::from(CENTRAL_ADDRESS),
            request_id,
            service,
            characteristic,
        },
        offset,
    })
}

pub struct LoopbackPeripheral {
    air: Arc<Air>,
}

#[async_trait]
impl PeripheralManager for LoopbackPeripheral {
    async fn is_powered(&self) -> Result<bool> {
        Ok(true)
    }

    async fn is_advertising(&self) -> Result<bool> {
        Ok(self.air.lock()?.advertising.is_some())
    }

    async fn start_advertising(&self, settings: &AdvertiseSettings, uuids: &[Uuid]) -> Result<()> {
        let outgoing = {
            let mut state = self.air.lock()?;
            if state.advertising.is_some() {
                vec![Outgoing::Peripheral(PeripheralEvent::AdvertisingFailed {
                    error: "Advertising already started".to_string(),
                })]
            } else {
                debug!("Loopback advertising {uuids:?} ({:?})", settings.mode);
                state.advertising = Some(uuids.to_vec());
                let mut outgoing = vec![Outgoing::Peripheral(PeripheralEvent::AdvertisingStarted)];
                outgoing.extend(state.discovery());
                outgoing
            }
        };
        self.air.emit(outgoing);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.air.lock()?.advertising = None;
        Ok(())
    }

    async fn add_service(&self, service: &Service) -> Result<()> {
        let mut state = self.air.lock()?;
        state.services.retain(|existing| existing.uuid != service.uuid);
        state.services.push(service.clone());
        Ok(())
    }

    async fn remove_services(&self) -> Result<()> {
        let outgoing = {
            let mut state = self.air.lock()?;
            state.services.clear();
            state.drop_link()
        };
        self.air.emit(outgoing);
        Ok(())
    }

    async fn send_response(
        &self,
        device: &DeviceId,
        request_id: u32,
        response: RequestResponse,
        offset: u64,
        value: Option<Vec<u8>>,
    ) -> Result<()> {
        if device.as_str() != CENTRAL_ADDRESS {
            return Err(Error::from_string(
                format!("Unknown central {device}"),
                ErrorType::Radio,
            ));
        }
        let outgoing = {
            let mut state = self.air.lock()?;
            let pending = state.pending.remove(&request_id).ok_or_else(|| {
                Error::from_string(format!("No request {request_id}"), ErrorType::Radio)
            })?;
            let peer = DeviceId::from(PERIPHERAL_ADDRESS);

            match pending {
                Pending::Read {
                    characteristic, ..
                } if response != RequestResponse::Success => {
                    Outgoing::Central(CentralEvent::CharacteristicRead {
                        device: peer,
                        characteristic,
                        value: Err(format!("Read rejected: {response:?}")),
                    })
                }
                Pending::Read {
                    service,
                    characteristic,
                    mut received,
                } => {
                    let mut chunk = value.unwrap_or_default();
                    chunk.truncate(self.air.mtu_payload);
                    let full_unit = chunk.len() == self.air.mtu_payload;
                    received.extend_from_slice(&chunk);

                    if full_unit {
                        let next_id = state.next_request_id();
                        let next_offset = offset + chunk.len() as u64;
                        state.pending.insert(
                            next_id,
                            Pending::Read {
                                service,
                                characteristic,
                                received,
                            },
                        );
                        read_request(next_id, service, characteristic, next_offset)
                    } else {
                        Outgoing::Central(CentralEvent::CharacteristicRead {
                            device: peer,
                            characteristic,
                            value: Ok(received),
                        })
                    }
                }
                Pending::Write { characteristic } => {
                    let result = match response {
                        RequestResponse::Success => Ok(()),
                        other => Err(format!("Write rejected: {other:?}")),
                    };
                    Outgoing::Central(CentralEvent::CharacteristicWritten {
                        device: peer,
                        characteristic,
                        result,
                    })
                }
            }
        };
        self.air.emit(vec![outgoing]);
        Ok(())
    }
}
