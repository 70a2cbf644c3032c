mod nfc_service;
mod ws;

use std::sync::Arc;

use crossbeam_channel::unbounded;
use log::{error, info};
use tokio::sync::broadcast;

use nfc_session::reader::PcscDetection;
use nfc_session::types::{NfcCommand, OutgoingMessage};
use nfc_session::{Config, NfcSession};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    info!(
        "Starting NFC Session Service (language {:?})...",
        config.session.language
    );

    // Channel: WS -> NFC (Commands)
    // Crossbeam (Sync) because the session and the PC/SC poller are blocking
    let (cmd_tx, cmd_rx) = unbounded::<NfcCommand>();

    // Channel: NFC -> WS (Events), bridged into a tokio broadcast for WS clients
    let (bridge_tx, bridge_rx) = unbounded::<OutgoingMessage>();
    let (event_tx, _) = broadcast::channel::<OutgoingMessage>(100);

    let detection = Arc::new(PcscDetection::new(config.poll_interval));
    let session = NfcSession::new(detection.clone(), bridge_tx.clone(), config.session.clone());

    std::thread::spawn(move || nfc_service::run(session, detection, cmd_rx, bridge_tx));

    let bridge_event_tx = event_tx.clone();
    std::thread::spawn(move || {
        while let Ok(msg) = bridge_rx.recv() {
            // No subscribers is not an error; the event is simply dropped.
            let _ = bridge_event_tx.send(msg);
        }
    });

    ws::start_server(config.listen_addr, cmd_tx, event_tx).await;
}
