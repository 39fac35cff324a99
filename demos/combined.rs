use std::sync::{Arc, Mutex};

use futures::StreamExt;
use gattlink::config::{self, Config};
use gattlink::loopback::LoopbackLink;
use gattlink::{CentralSession, FnHandler, PeripheralSession};

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    config::init_logger(&config);

    let link = LoopbackLink::new(config.event_buffer);

    // Peripheral role: serves a greeting and remembers what was written.
    let greeting = Arc::new(Mutex::new(b"hello from the peripheral".to_vec()));
    let read_value = greeting.clone();
    let handler = FnHandler::new(
        move || read_value.lock().map(|v| v.clone()).unwrap_or_default(),
        move |value: &[u8]| {
            log::info!("Peripheral received {:?}", String::from_utf8_lossy(value));
            if let Ok(mut current) = greeting.lock() {
                *current = value.to_vec();
            }
        },
    );
    let peripheral = PeripheralSession::new(
        link.peripheral,
        link.peripheral_events,
        handler,
        config.clone(),
    );

    let mut devices = Box::pin(peripheral.connected_devices());
    tokio::spawn(async move {
        while let Some(devices) = devices.next().await {
            log::info!("Connected centrals: {devices:?}");
        }
    });

    if let Err(error) = peripheral.start().await {
        log::error!("Peripheral failed to start: {error}");
        return;
    }

    // Central role.
    let central = CentralSession::new(link.central, link.central_events, config);
    if let Err(error) = central.connect().await {
        log::error!("Connect failed: {error}");
        return;
    }

    match central.read().await {
        Ok(value) => log::info!("Central read {:?}", String::from_utf8_lossy(&value)),
        Err(error) => log::error!("Read failed: {error}"),
    }
    if let Err(error) = central.write(b"hello from the central").await {
        log::error!("Write failed: {error}");
    }
    match central.read().await {
        Ok(value) => log::info!("Central read {:?}", String::from_utf8_lossy(&value)),
        Err(error) => log::error!("Read failed: {error}"),
    }

    central.destroy().await;
    peripheral.destroy().await;
}
