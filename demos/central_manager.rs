use gattlink::api::central::DeviceId;
use gattlink::api::characteristic::read_fragment;
use gattlink::api::peripheral::PeripheralManager;
use gattlink::api::peripheral_event::{PeripheralEvent, RequestResponse};
use gattlink::config::{self, Config};
use gattlink::loopback::LoopbackLink;
use gattlink::CentralSession;

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    config::init_logger(&config);

    let link = LoopbackLink::new(config.event_buffer);

    // Bare radio-level peripheral: no session, answers requests by hand.
    let identity = config.identity;
    let radio = link.peripheral.clone();
    if let Err(error) = radio.add_service(&identity.service_definition()).await {
        log::error!("Failed to add service: {error}");
        return;
    }
    if let Err(error) = radio.start_advertising(&config.advertise, &[identity.service]).await {
        log::error!("Failed to advertise: {error}");
        return;
    }
    let mut peripheral_events = link.peripheral_events;
    tokio::spawn(async move {
        while let Some(event) = peripheral_events.recv().await {
            handle_updates(radio.as_ref(), event).await;
        }
    });

    let central = CentralSession::new(link.central, link.central_events, config);
    if let Err(error) = central.connect().await {
        log::error!("Connect failed: {error}");
        return;
    }
    log::info!("Connected to {:?}", central.device());

    match central.read().await {
        Ok(value) => log::info!("Read {:?}", String::from_utf8_lossy(&value)),
        Err(error) => log::error!("Read failed: {error}"),
    }
    central.destroy().await;
}

/// Listen to all updates and respond if required
async fn handle_updates<P: PeripheralManager + ?Sized>(radio: &P, update: PeripheralEvent) {
    const VALUE: &[u8] = b"a value long enough to need more than one read response";
    match update {
        PeripheralEvent::ReadRequest { request, offset } => {
            let fragment = read_fragment(VALUE, offset).to_vec();
            respond(radio, &request.client, request.request_id, offset, Some(fragment)).await;
        }
        PeripheralEvent::WriteRequest {
            request,
            value: Some(value),
            offset,
        } => {
            log::info!("Written {:?}", String::from_utf8_lossy(&value));
            respond(radio, &request.client, request.request_id, offset, None).await;
        }
        other => log::debug!("Peripheral event {other:?}"),
    }
}

async fn respond<P: PeripheralManager + ?Sized>(
    radio: &P,
    client: &DeviceId,
    request_id: u32,
    offset: u64,
    value: Option<Vec<u8>>,
) {
    if let Err(error) = radio
        .send_response(client, request_id, RequestResponse::Success, offset, value)
        .await
    {
        log::error!("Failed to respond: {error}");
    }
}
