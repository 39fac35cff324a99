use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::Stream;
use log::{debug, info, trace, warn};
use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::Result;
use crate::api::central::DeviceId;
use crate::api::characteristic::read_fragment;
use crate::api::peripheral::PeripheralManager;
use crate::api::peripheral_event::{PeripheralEvent, PeripheralRequest, RequestResponse};
use crate::bridge::watch_stream;
use crate::config::Config;

/// Centrals currently connected to the GATT server.
pub type ConnectedDevices = BTreeSet<DeviceId>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdvertisingState {
    Idle,
    Starting,
    Advertising,
    /// The stack refused or stopped advertising. Not retried.
    Failed(String),
}

/// Owner callbacks serving the characteristic.
///
/// Both run on the session's event task and must return promptly.
pub trait CharacteristicHandler: Send + Sync {
    /// Current value, fetched for every inbound read.
    fn produce_read_value(&self) -> Vec<u8>;

    fn consume_written_value(&self, value: &[u8]);
}

/// [`CharacteristicHandler`] built from a pair of closures.
pub struct FnHandler<P, C> {
    produce: P,
    consume: C,
}

impl<P, C> FnHandler<P, C>
where
    P: Fn() -> Vec<u8> + Send + Sync,
    C: Fn(&[u8]) + Send + Sync,
{
    pub fn new(produce: P, consume: C) -> Self {
        FnHandler { produce, consume }
    }
}

impl<P, C> CharacteristicHandler for FnHandler<P, C>
where
    P: Fn() -> Vec<u8> + Send + Sync,
    C: Fn(&[u8]) + Send + Sync,
{
    fn produce_read_value(&self) -> Vec<u8> {
        (self.produce)()
    }

    fn consume_written_value(&self, value: &[u8]) {
        (self.consume)(value)
    }
}

struct Shared<R: ?Sized, H> {
    radio: Arc<R>,
    handler: H,
    config: Config,
    devices: watch::Sender<ConnectedDevices>,
    advertising: watch::Sender<AdvertisingState>,
    powered: watch::Sender<Option<bool>>,
    serving: AtomicBool,
}

/// Peripheral side of the exchange: advertises the service, runs the GATT
/// server and answers every connected central from the same handler.
pub struct PeripheralSession<R: PeripheralManager + ?Sized + 'static, H: CharacteristicHandler + 'static>
{
    shared: Arc<Shared<R, H>>,
    event_loop: JoinHandle<()>,
}

impl<R, H> PeripheralSession<R, H>
where
    R: PeripheralManager + ?Sized + 'static,
    H: CharacteristicHandler + 'static,
{
    /// Must be called from within a tokio runtime.
    pub fn new(radio: Arc<R>, events: Receiver<PeripheralEvent>, handler: H, config: Config) -> Self {
        let (devices, _) = watch::channel(ConnectedDevices::new());
        let (advertising, _) = watch::channel(AdvertisingState::Idle);
        let (powered, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            radio,
            handler,
            config,
            devices,
            advertising,
            powered,
            serving: AtomicBool::new(false),
        });
        let event_loop = tokio::spawn(run_event_loop(shared.clone(), events));
        PeripheralSession { shared, event_loop }
    }

    /// Registers the service on the GATT server, then starts advertising it.
    /// Does nothing while advertising is already starting or running.
    ///
    /// Advertising failures reported later by the stack only show up in
    /// [`advertising_state`](Self::advertising_state).
    pub async fn start(&self) -> Result<()> {
        let shared = &self.shared;
        let identity = shared.config.identity;

        if !shared.serving.swap(true, Ordering::SeqCst) {
            if let Err(error) = shared.radio.add_service(&identity.service_definition()).await {
                shared.serving.store(false, Ordering::SeqCst);
                return Err(error);
            }
            debug!("GATT server serving {}", identity.service);
        }

        let starting = shared.advertising.send_if_modified(|state| match *state {
            AdvertisingState::Starting | AdvertisingState::Advertising => false,
            _ => {
                *state = AdvertisingState::Starting;
                true
            }
        });
        if !starting {
            debug!("Already advertising {}", identity.service);
            return Ok(());
        }
        if let Err(error) = shared
            .radio
            .start_advertising(&shared.config.advertise, &[identity.service])
            .await
        {
            warn!("Advertising rejected: {error}");
            shared
                .advertising
                .send_replace(AdvertisingState::Failed(error.message.clone()));
            return Err(error);
        }
        Ok(())
    }

    /// Stops advertising and closes the GATT server. Safe to call repeatedly.
    pub async fn destroy(&self) {
        let shared = &self.shared;
        let previous = shared.advertising.send_replace(AdvertisingState::Idle);
        if previous != AdvertisingState::Idle {
            if let Err(error) = shared.radio.stop_advertising().await {
                warn!("Failed to stop advertising: {error}");
            }
        }
        if shared.serving.swap(false, Ordering::SeqCst) {
            if let Err(error) = shared.radio.remove_services().await {
                warn!("Failed to close GATT server: {error}");
            }
        }
    }

    pub fn connected_devices(&self) -> impl Stream<Item = ConnectedDevices> + Send + 'static {
        watch_stream(self.shared.devices.subscribe())
    }

    pub fn connected_devices_snapshot(&self) -> ConnectedDevices {
        self.shared.devices.borrow().clone()
    }

    pub fn advertising_state(&self) -> AdvertisingState {
        self.shared.advertising.borrow().clone()
    }

    pub fn advertising_stream(&self) -> impl Stream<Item = AdvertisingState> + Send + 'static {
        watch_stream(self.shared.advertising.subscribe())
    }

    /// Last adapter power state reported by the stack, if any.
    pub fn is_powered(&self) -> Option<bool> {
        *self.shared.powered.borrow()
    }
}

impl<R, H> Drop for PeripheralSession<R, H>
where
    R: PeripheralManager + ?Sized + 'static,
    H: CharacteristicHandler + 'static,
{
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl<R, H> Shared<R, H>
where
    R: PeripheralManager + ?Sized + 'static,
    H: CharacteristicHandler + 'static,
{
    async fn handle_event(&self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::StateUpdate { is_powered } => {
                self.powered.send_replace(Some(is_powered));
            }
            PeripheralEvent::AdvertisingStarted => {
                let started = self.advertising.send_if_modified(|state| {
                    if *state == AdvertisingState::Starting {
                        *state = AdvertisingState::Advertising;
                        return true;
                    }
                    false
                });
                if started {
                    info!("Advertising {}", self.config.identity.service);
                }
            }
            PeripheralEvent::AdvertisingFailed { error } => {
                warn!("Advertising failed: {error}");
                self.advertising
                    .send_replace(AdvertisingState::Failed(error));
            }
            PeripheralEvent::ConnectionStateChanged { device, connected } => {
                self.update_devices(device, connected);
            }
            PeripheralEvent::ReadRequest { request, offset } => {
                if !self.is_ours(&request) {
                    return;
                }
                let value = self.handler.produce_read_value();
                let fragment = read_fragment(&value, offset).to_vec();
                self.respond(&request, offset, Some(fragment)).await;
            }
            PeripheralEvent::WriteRequest {
                request,
                value,
                offset,
            } => {
                let value = match value {
                    Some(value) => value,
                    None => {
                        debug!(
                            "Dropping write request {} from {} without payload",
                            request.request_id, request.client
                        );
                        return;
                    }
                };
                if !self.is_ours(&request) {
                    return;
                }
                self.handler.consume_written_value(&value);
                self.respond(&request, offset, None).await;
            }
        }
    }

    fn update_devices(&self, device: DeviceId, connected: bool) {
        let changed = self.devices.send_if_modified(|devices| {
            if connected {
                devices.insert(device.clone())
            } else {
                devices.remove(&device)
            }
        });
        if changed {
            debug!(
                "Central {device} {}",
                if connected { "connected" } else { "disconnected" }
            );
        } else {
            trace!("Connection state of {device} unchanged (connected: {connected})");
        }
    }

    fn is_ours(&self, request: &PeripheralRequest) -> bool {
        let identity = self.config.identity;
        if request.service != identity.service || request.characteristic != identity.characteristic {
            warn!(
                "Ignoring request {} for {}/{}",
                request.request_id, request.service, request.characteristic
            );
            return false;
        }
        true
    }

    async fn respond(&self, request: &PeripheralRequest, offset: u64, value: Option<Vec<u8>>) {
        if let Err(error) = self
            .radio
            .send_response(
                &request.client,
                request.request_id,
                RequestResponse::Success,
                offset,
                value,
            )
            .await
        {
            warn!(
                "Failed to answer request {} from {}: {error}",
                request.request_id, request.client
            );
        }
    }
}

async fn run_event_loop<R, H>(shared: Arc<Shared<R, H>>, mut events: Receiver<PeripheralEvent>)
where
    R: PeripheralManager + ?Sized + 'static,
    H: CharacteristicHandler + 'static,
{
    while let Some(event) = events.recv().await {
        trace!("Peripheral event: {event:?}");
        shared.handle_event(event).await;
    }
    debug!("Peripheral event channel closed");
}
