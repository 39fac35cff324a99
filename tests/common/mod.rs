#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use gattlink::api::central::{CentralManager, DeviceId, ScanFilter};
use gattlink::api::central_event::CentralEvent;
use gattlink::api::characteristic::CharacteristicWriteType;
use gattlink::api::peripheral::{AdvertiseSettings, PeripheralManager};
use gattlink::api::peripheral_event::{PeripheralEvent, PeripheralRequest, RequestResponse};
use gattlink::api::service::{Service, ServiceIdentity};
use gattlink::config::Config;
use gattlink::{
    CentralSession, CharacteristicHandler, ConnectionState, PeripheralSession, Result,
};
use tokio::sync::mpsc::{self, Sender, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(50);

pub fn peer() -> DeviceId {
    DeviceId::from("AA:BB:CC:DD:EE:01")
}

pub fn identity() -> ServiceIdentity {
    ServiceIdentity::default()
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CentralCall {
    StartScan(ScanFilter),
    StopScan,
    Connect(DeviceId),
    Disconnect(DeviceId),
    DiscoverServices(DeviceId),
    Read(DeviceId, Uuid, Uuid),
    Write(DeviceId, Vec<u8>),
}

/// Central radio that records every call and lets the test script callbacks.
pub struct FakeCentral {
    calls: UnboundedSender<CentralCall>,
}

impl FakeCentral {
    fn record(&self, call: CentralCall) -> Result<()> {
        let _ = self.calls.send(call);
        Ok(())
    }
}

#[async_trait]
impl CentralManager for FakeCentral {
    async fn is_powered(&self) -> Result<bool> {
        Ok(true)
    }

    async fn start_scan(&self, filter: ScanFilter) -> Result<()> {
        self.record(CentralCall::StartScan(filter))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(CentralCall::StopScan)
    }

    async fn connect(&self, device: &DeviceId) -> Result<()> {
        self.record(CentralCall::Connect(device.clone()))
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        self.record(CentralCall::Disconnect(device.clone()))
    }

    async fn discover_services(&self, device: &DeviceId) -> Result<()> {
        self.record(CentralCall::DiscoverServices(device.clone()))
    }

    async fn read(&self, device: &DeviceId, service: Uuid, characteristic: Uuid) -> Result<()> {
        self.record(CentralCall::Read(device.clone(), service, characteristic))
    }

    async fn write(
        &self,
        device: &DeviceId,
        _service: Uuid,
        _characteristic: Uuid,
        data: &[u8],
        _write_type: CharacteristicWriteType,
    ) -> Result<()> {
        self.record(CentralCall::Write(device.clone(), data.to_vec()))
    }
}

pub struct CentralHarness {
    pub session: Arc<CentralSession<FakeCentral>>,
    pub events: Sender<CentralEvent>,
    pub calls: UnboundedReceiver<CentralCall>,
}

impl CentralHarness {
    pub fn new() -> Self {
        let (calls_tx, calls) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::channel(64);
        let radio = Arc::new(FakeCentral { calls: calls_tx });
        let session = Arc::new(CentralSession::new(radio, events_rx, Config::default()));
        CentralHarness {
            session,
            events,
            calls,
        }
    }

    pub async fn emit(&self, event: CentralEvent) {
        self.events.send(event).await.expect("event loop gone");
    }

    pub async fn next_call(&mut self) -> CentralCall {
        timeout(WAIT, self.calls.recv())
            .await
            .expect("timed out waiting for radio call")
            .expect("radio dropped")
    }

    pub async fn expect_quiet(&mut self) {
        if let Ok(Some(call)) = timeout(QUIET, self.calls.recv()).await {
            panic!("unexpected radio call {call:?}");
        }
    }

    pub async fn wait_for_state(&self, wanted: ConnectionState) {
        let mut states = Box::pin(self.session.state_stream());
        timeout(WAIT, async {
            while let Some(state) = states.next().await {
                if state == wanted {
                    return;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached {wanted:?}, at {:?}", self.session.state()));
    }

    pub fn spawn_connect(&self) -> tokio::task::JoinHandle<Result<()>> {
        let session = self.session.clone();
        tokio::spawn(async move { session.connect().await })
    }

    pub fn spawn_read(&self) -> tokio::task::JoinHandle<Result<Vec<u8>>> {
        let session = self.session.clone();
        tokio::spawn(async move { session.read().await })
    }

    pub fn spawn_write(&self, value: &[u8]) -> tokio::task::JoinHandle<Result<()>> {
        let session = self.session.clone();
        let value = value.to_vec();
        tokio::spawn(async move { session.write(&value).await })
    }

    /// Drives a `connect()` through scan, connection and discovery.
    pub async fn establish(&mut self) {
        let connecting = self.spawn_connect();
        assert_eq!(
            self.next_call().await,
            CentralCall::StartScan(ScanFilter::service(identity().service))
        );
        self.emit(CentralEvent::DeviceDiscovered {
            device: peer(),
            services: vec![identity().service],
        })
        .await;
        assert_eq!(self.next_call().await, CentralCall::StopScan);
        assert_eq!(self.next_call().await, CentralCall::Connect(peer()));
        self.emit(CentralEvent::DeviceConnected { device: peer() }).await;
        assert_eq!(self.next_call().await, CentralCall::DiscoverServices(peer()));
        self.emit(CentralEvent::ServicesDiscovered {
            device: peer(),
            services: Ok(vec![identity().service_definition()]),
        })
        .await;
        timeout(WAIT, connecting)
            .await
            .expect("connect timed out")
            .expect("connect panicked")
            .expect("connect failed");
        assert_eq!(self.session.state(), ConnectionState::Ready);
    }

    pub async fn complete_read(&self, value: &[u8]) {
        self.emit(CentralEvent::CharacteristicRead {
            device: peer(),
            characteristic: identity().characteristic,
            value: Ok(value.to_vec()),
        })
        .await;
    }

    pub async fn complete_write(&self) {
        self.emit(CentralEvent::CharacteristicWritten {
            device: peer(),
            characteristic: identity().characteristic,
            result: Ok(()),
        })
        .await;
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeripheralCall {
    StartAdvertising(Vec<Uuid>),
    StopAdvertising,
    AddService(Service),
    RemoveServices,
    Respond {
        device: DeviceId,
        request_id: u32,
        response: RequestResponse,
        offset: u64,
        value: Option<Vec<u8>>,
    },
}

pub struct FakePeripheral {
    calls: UnboundedSender<PeripheralCall>,
}

#[async_trait]
impl PeripheralManager for FakePeripheral {
    async fn is_powered(&self) -> Result<bool> {
        Ok(true)
    }

    async fn is_advertising(&self) -> Result<bool> {
        Ok(false)
    }

    async fn start_advertising(&self, _settings: &AdvertiseSettings, uuids: &[Uuid]) -> Result<()> {
        let _ = self.calls.send(PeripheralCall::StartAdvertising(uuids.to_vec()));
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        let _ = self.calls.send(PeripheralCall::StopAdvertising);
        Ok(())
    }

    async fn add_service(&self, service: &Service) -> Result<()> {
        let _ = self.calls.send(PeripheralCall::AddService(service.clone()));
        Ok(())
    }

    async fn remove_services(&self) -> Result<()> {
        let _ = self.calls.send(PeripheralCall::RemoveServices);
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
        let _ = self.calls.send(PeripheralCall::Respond {
            device: device.clone(),
            request_id,
            response,
            offset,
            value,
        });
        Ok(())
    }
}

/// Handler serving a fixed value and recording writes.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub value: Arc<Mutex<Vec<u8>>>,
    pub reads: Arc<Mutex<usize>>,
    pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingHandler {
    pub fn serving(value: &[u8]) -> Self {
        let handler = RecordingHandler::default();
        *handler.value.lock().unwrap() = value.to_vec();
        handler
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap()
    }
}

impl CharacteristicHandler for RecordingHandler {
    fn produce_read_value(&self) -> Vec<u8> {
        *self.reads.lock().unwrap() += 1;
        self.value.lock().unwrap().clone()
    }

    fn consume_written_value(&self, value: &[u8]) {
        self.writes.lock().unwrap().push(value.to_vec());
    }
}

pub struct PeripheralHarness {
    pub session: PeripheralSession<FakePeripheral, RecordingHandler>,
    pub handler: RecordingHandler,
    pub events: Sender<PeripheralEvent>,
    pub calls: UnboundedReceiver<PeripheralCall>,
}

impl PeripheralHarness {
    pub fn serving(value: &[u8]) -> Self {
        let (calls_tx, calls) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::channel(64);
        let handler = RecordingHandler::serving(value);
        let session = PeripheralSession::new(
            Arc::new(FakePeripheral { calls: calls_tx }),
            events_rx,
            handler.clone(),
            Config::default(),
        );
        PeripheralHarness {
            session,
            handler,
            events,
            calls,
        }
    }

    pub async fn emit(&self, event: PeripheralEvent) {
        self.events.send(event).await.expect("event loop gone");
    }

    pub async fn next_call(&mut self) -> PeripheralCall {
        timeout(WAIT, self.calls.recv())
            .await
            .expect("timed out waiting for radio call")
            .expect("radio dropped")
    }

    pub async fn expect_quiet(&mut self) {
        if let Ok(Some(call)) = timeout(QUIET, self.calls.recv()).await {
            panic!("unexpected radio call {call:?}");
        }
    }

    pub async fn read(&self, device: &DeviceId, request_id: u32, offset: u64) {
        self.emit(PeripheralEvent::ReadRequest {
            request: request(device, request_id),
            offset,
        })
        .await;
    }

    pub async fn write(&self, device: &DeviceId, request_id: u32, value: Option<&[u8]>) {
        self.emit(PeripheralEvent::WriteRequest {
            request: request(device, request_id),
            value: value.map(|value| value.to_vec()),
            offset: 0,
        })
        .await;
    }

    pub async fn connection(&self, device: &DeviceId, connected: bool) {
        self.emit(PeripheralEvent::ConnectionStateChanged {
            device: device.clone(),
            connected,
        })
        .await;
    }
}

pub fn request(device: &DeviceId, request_id: u32) -> PeripheralRequest {
    PeripheralRequest {
        client: device.clone(),
        request_id,
        service: identity().service,
        characteristic: identity().characteristic,
    }
}
