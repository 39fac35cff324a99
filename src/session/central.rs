use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use log::{debug, trace, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::central::{CentralManager, DeviceId, ScanFilter};
use crate::api::central_event::{CentralEvent, CentralState};
use crate::api::service::Service;
use crate::bridge::{OneShot, ResponseChannel, watch_stream};
use crate::config::Config;
use crate::{Error, ErrorType, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Discovering,
    Ready,
}

#[derive(Debug)]
enum Completion {
    Read(Vec<u8>),
    Written,
}

struct Shared<R: ?Sized> {
    radio: Arc<R>,
    config: Config,
    state: watch::Sender<ConnectionState>,
    device: Mutex<Option<DeviceId>>,
    /// Bumped by every `connect()` scan; a teardown only stops its own scan.
    scan_generation: AtomicU64,
    /// Orders scan start and stop calls on the radio.
    scan_turn: tokio::sync::Mutex<()>,
    discovery: OneShot<DeviceId>,
    link: OneShot<()>,
    responses: ResponseChannel<Completion>,
}

/// Central side of the exchange: finds the peripheral exposing the service,
/// holds the connection and issues serialized reads and writes against the
/// characteristic.
///
/// Radio callbacks are consumed by a background task which is the only
/// place connection transitions happen; callers wait on the results.
///
/// Concurrent `read`/`write` calls queue in call order. A call only reaches
/// the radio once the previous one has completed, failed or been cancelled.
pub struct CentralSession<R: CentralManager + ?Sized + 'static> {
    shared: Arc<Shared<R>>,
    event_loop: JoinHandle<()>,
}

impl<R: CentralManager + ?Sized + 'static> CentralSession<R> {
    /// Must be called from within a tokio runtime.
    pub fn new(radio: Arc<R>, events: Receiver<CentralEvent>, config: Config) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            radio,
            config,
            state,
            device: Mutex::new(None),
            scan_generation: AtomicU64::new(0),
            scan_turn: tokio::sync::Mutex::new(()),
            discovery: OneShot::new(),
            link: OneShot::new(),
            responses: ResponseChannel::new("characteristic"),
        });
        let event_loop = tokio::spawn(run_event_loop(shared.clone(), events));
        CentralSession { shared, event_loop }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Identifier of the device the session is attached to, if any.
    pub fn device(&self) -> Option<DeviceId> {
        self.shared.current_device()
    }

    pub fn state_stream(&self) -> impl Stream<Item = ConnectionState> + Send + 'static {
        watch_stream(self.shared.state.subscribe())
    }

    pub fn is_ready_stream(&self) -> impl Stream<Item = bool> + Send + 'static {
        self.state_stream()
            .map(|state| state == ConnectionState::Ready)
    }

    /// Scans for the service, connects to the first match and enumerates its
    /// services. Resolves once the session is `Ready`.
    ///
    /// Never resolves on its own if nothing advertises the service; drop the
    /// future to give up, which stops the scan.
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        let mut observed = ConnectionState::Disconnected;
        let started = shared.state.send_if_modified(|state| {
            observed = *state;
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Scanning;
                return true;
            }
            false
        });
        if !started {
            return Err(Error::from_string(
                format!("Cannot connect while {observed:?}"),
                ErrorType::InvalidState,
            ));
        }
        debug!("Central state: Disconnected -> Scanning");

        let device = match self.scan().await {
            Ok(device) => device,
            Err(error) => {
                shared.leave(ConnectionState::Scanning);
                return Err(error);
            }
        };

        self.attach(device).await
    }

    async fn scan(&self) -> Result<DeviceId> {
        let shared = &self.shared;
        let generation = shared.scan_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let teardown = shared.clone();
        let waiter = shared.discovery.arm()?.on_cancel(move || {
            teardown.leave(ConnectionState::Scanning);
            spawn_teardown("stop scan", async move { teardown.stop_scan(generation).await });
        });

        let filter = ScanFilter::service(shared.config.identity.service);
        {
            let _scan = shared.scan_turn.lock().await;
            shared.radio.start_scan(filter).await?;
        }
        waiter.wait().await
    }

    async fn attach(&self, device: DeviceId) -> Result<()> {
        let shared = &self.shared;
        shared.set_device(Some(device.clone()));
        let moved = shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Scanning {
                *state = ConnectionState::Connecting;
                return true;
            }
            false
        });
        if !moved {
            shared.set_device(None);
            return Err(Error::destroyed());
        }
        debug!("Central state: Scanning -> Connecting ({device})");

        let teardown = shared.clone();
        let cancelled_device = device.clone();
        let waiter = shared.link.arm()?.on_cancel(move || {
            teardown.set_device(None);
            teardown.state.send_replace(ConnectionState::Disconnected);
            let radio = teardown.radio.clone();
            spawn_teardown("disconnect", async move { radio.disconnect(&cancelled_device).await });
        });

        if let Err(error) = shared.radio.stop_scan().await {
            warn!("Failed to stop scan after discovery: {error}");
        }
        shared.radio.connect(&device).await?;
        waiter.wait().await
    }

    /// Reads the characteristic, waiting for the session to become `Ready`.
    pub async fn read(&self) -> Result<Vec<u8>> {
        self.wait_until_ready().await?;
        let shared = &self.shared;
        let identity = shared.config.identity;
        let completion = shared
            .responses
            .request(|| async move {
                let device = shared.ready_device()?;
                shared
                    .radio
                    .read(&device, identity.service, identity.characteristic)
                    .await
            })
            .await?;

        match completion {
            Completion::Read(value) => Ok(value),
            Completion::Written => Err(Error::from_string(
                "Write completion delivered for a read".to_string(),
                ErrorType::Radio,
            )),
        }
    }

    /// Writes `value` to the characteristic and waits for the delivery
    /// confirmation.
    pub async fn write(&self, value: &[u8]) -> Result<()> {
        self.wait_until_ready().await?;
        let shared = &self.shared;
        let identity = shared.config.identity;
        let write_type = shared.config.write_type;
        let completion = shared
            .responses
            .request(|| async move {
                let device = shared.ready_device()?;
                shared
                    .radio
                    .write(
                        &device,
                        identity.service,
                        identity.characteristic,
                        value,
                        write_type,
                    )
                    .await
            })
            .await?;

        match completion {
            Completion::Written => Ok(()),
            Completion::Read(_) => Err(Error::from_string(
                "Read completion delivered for a write".to_string(),
                ErrorType::Radio,
            )),
        }
    }

    /// Stops any scan, releases the connection and fails whatever is
    /// waiting on it. Safe to call repeatedly and from any state.
    pub async fn destroy(&self) {
        let shared = &self.shared;
        let scan = shared.scan_generation.load(Ordering::SeqCst);
        let previous = shared.state.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            debug!("Central state: {previous:?} -> Disconnected (destroy)");
        }

        shared.discovery.resolve(Err(Error::destroyed()));
        shared.link.resolve(Err(Error::destroyed()));
        shared.responses.fail(Error::destroyed());

        if previous == ConnectionState::Scanning {
            if let Err(error) = shared.stop_scan(scan).await {
                warn!("Failed to stop scan: {error}");
            }
        }
        if let Some(device) = shared.set_device(None) {
            if let Err(error) = shared.radio.disconnect(&device).await {
                warn!("Failed to release connection to {device}: {error}");
            }
        }
    }

    async fn wait_until_ready(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        state
            .wait_for(|state| *state == ConnectionState::Ready)
            .await
            .map(|_| ())
            .map_err(|_| Error::destroyed())
    }
}

impl<R: CentralManager + ?Sized + 'static> Drop for CentralSession<R> {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl<R: CentralManager + ?Sized + 'static> Shared<R> {
    fn current_device(&self) -> Option<DeviceId> {
        self.device.lock().ok().and_then(|device| device.clone())
    }

    fn set_device(&self, device: Option<DeviceId>) -> Option<DeviceId> {
        match self.device.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, device),
            Err(_) => None,
        }
    }

    fn is_current(&self, device: &DeviceId) -> bool {
        self.current_device().as_ref() == Some(device)
    }

    fn ready_device(&self) -> Result<DeviceId> {
        if *self.state.borrow() != ConnectionState::Ready {
            return Err(Error::connection_lost());
        }
        self.current_device().ok_or_else(Error::connection_lost)
    }

    /// Stops the scan started as `generation` unless a newer `connect()` has
    /// already taken the scanner over.
    async fn stop_scan(&self, generation: u64) -> Result<()> {
        let _scan = self.scan_turn.lock().await;
        if self.scan_generation.load(Ordering::SeqCst) != generation {
            trace!("Scan {generation} superseded, leaving the scanner running");
            return Ok(());
        }
        self.radio.stop_scan().await
    }

    /// Falls back to `Disconnected` if still in `phase`.
    fn leave(&self, phase: ConnectionState) {
        let left = self.state.send_if_modified(|state| {
            if *state == phase {
                *state = ConnectionState::Disconnected;
                return true;
            }
            false
        });
        if left {
            debug!("Central state: {phase:?} -> Disconnected");
        }
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                return true;
            }
            false
        });
        if moved {
            debug!("Central state: {from:?} -> {to:?}");
        }
        moved
    }

    /// The link is gone: reset state, then fail whoever waits on it.
    fn drop_link(&self, error: Error) {
        self.set_device(None);
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            debug!("Central state: {previous:?} -> Disconnected ({})", error.message);
        }
        self.link.resolve(Err(error.clone()));
        self.responses.fail(error);
    }

    async fn handle_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::StateUpdate { state } => {
                if state != CentralState::PoweredOff {
                    return;
                }
                if *self.state.borrow() == ConnectionState::Scanning {
                    warn!("Adapter powered off while scanning");
                    self.discovery.resolve(Err(Error::from_string(
                        "Adapter powered off".to_string(),
                        ErrorType::Radio,
                    )));
                    self.leave(ConnectionState::Scanning);
                } else if self.current_device().is_some() {
                    self.drop_link(Error::from_string(
                        "Adapter powered off".to_string(),
                        ErrorType::ConnectionLost,
                    ));
                }
            }
            CentralEvent::DeviceDiscovered { device, services } => {
                let service = self.config.identity.service;
                if !services.is_empty() && !services.contains(&service) {
                    trace!("Ignoring {device}: does not advertise {service}");
                    return;
                }
                if *self.state.borrow() != ConnectionState::Scanning
                    || !self.discovery.resolve(Ok(device.clone()))
                {
                    trace!("Ignoring discovery of {device}: not scanning");
                }
            }
            CentralEvent::ScanFailed { error } => {
                warn!("Scan failed: {error}");
                self.discovery
                    .resolve(Err(Error::from_string(error, ErrorType::Radio)));
            }
            CentralEvent::DeviceConnected { device } => {
                if !self.is_current(&device)
                    || !self.transition(ConnectionState::Connecting, ConnectionState::Discovering)
                {
                    warn!("Ignoring stale connection to {device}");
                    return;
                }
                if let Err(error) = self.radio.discover_services(&device).await {
                    self.release(&device, error).await;
                }
            }
            CentralEvent::ConnectionFailed { device, error } => {
                if !self.is_current(&device) {
                    return;
                }
                let message = error.unwrap_or_else(|| format!("Failed to connect to {device}"));
                self.drop_link(Error::from_string(message, ErrorType::ConnectionFailed));
            }
            CentralEvent::DeviceDisconnected { device } => {
                if self.is_current(&device) {
                    self.drop_link(Error::connection_lost());
                } else {
                    trace!("Ignoring disconnect of unknown device {device}");
                }
            }
            CentralEvent::ServicesDiscovered { device, services } => {
                if !self.is_current(&device) || *self.state.borrow() != ConnectionState::Discovering
                {
                    trace!("Ignoring stale service discovery for {device}");
                    return;
                }
                match self.check_services(services) {
                    Ok(()) => {
                        if self.transition(ConnectionState::Discovering, ConnectionState::Ready) {
                            self.link.resolve(Ok(()));
                        }
                    }
                    Err(error) => self.release(&device, error).await,
                }
            }
            CentralEvent::CharacteristicRead {
                device,
                characteristic,
                value,
            } => {
                if self.accepts_completion(&device, characteristic) {
                    self.responses.deliver(
                        value
                            .map(Completion::Read)
                            .map_err(|error| Error::from_string(error, ErrorType::Radio)),
                    );
                }
            }
            CentralEvent::CharacteristicWritten {
                device,
                characteristic,
                result,
            } => {
                if self.accepts_completion(&device, characteristic) {
                    self.responses.deliver(
                        result
                            .map(|_| Completion::Written)
                            .map_err(|error| Error::from_string(error, ErrorType::Radio)),
                    );
                }
            }
        }
    }

    fn check_services(&self, services: std::result::Result<Vec<Service>, String>) -> Result<()> {
        let services =
            services.map_err(|error| Error::from_string(error, ErrorType::ServiceNotFound))?;
        let identity = self.config.identity;
        if !identity.is_exposed_by(&services) {
            return Err(Error::from_string(
                format!(
                    "Service {} with characteristic {} not found",
                    identity.service, identity.characteristic
                ),
                ErrorType::ServiceNotFound,
            ));
        }
        Ok(())
    }

    fn accepts_completion(&self, device: &DeviceId, characteristic: uuid::Uuid) -> bool {
        if characteristic != self.config.identity.characteristic || !self.is_current(device) {
            warn!("Dropping completion for {device}/{characteristic}: not ours");
            return false;
        }
        true
    }

    /// Gives up on a half-established link and reports `error` to `connect()`.
    async fn release(&self, device: &DeviceId, error: Error) {
        warn!("Releasing {device}: {error}");
        self.drop_link(error);
        if let Err(error) = self.radio.disconnect(device).await {
            warn!("Failed to release connection to {device}: {error}");
        }
    }
}

async fn run_event_loop<R: CentralManager + ?Sized + 'static>(
    shared: Arc<Shared<R>>,
    mut events: Receiver<CentralEvent>,
) {
    while let Some(event) = events.recv().await {
        trace!("Central event: {event:?}");
        shared.handle_event(event).await;
    }
    debug!("Central event channel closed");
    shared.discovery.resolve(Err(Error::from_string(
        "Radio event channel closed".to_string(),
        ErrorType::Radio,
    )));
    if shared.current_device().is_some() {
        shared.drop_link(Error::connection_lost());
    }
}

/// Runs radio cleanup from a synchronous context such as a drop.
fn spawn_teardown<F>(what: &'static str, cleanup: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(error) = cleanup.await {
                    warn!("Failed to {what}: {error}");
                }
            });
        }
        Err(_) => warn!("No runtime to {what} on"),
    }
}

