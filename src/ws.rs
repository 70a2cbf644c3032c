// src/ws.rs
use std::net::SocketAddr;

use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use warp::Filter;

use nfc_session::types::{IncomingMessage, NfcCommand, OutgoingMessage};

pub async fn start_server(
    addr: SocketAddr,
    nfc_cmd_tx: Sender<NfcCommand>,
    events: broadcast::Sender<OutgoingMessage>,
) {
    // WS Route (Matches root path "/")
    let ws_route = warp::path::end()
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let nfc_cmd_tx = nfc_cmd_tx.clone();
            let events = events.clone();

            // Allow any origin (Standard behavior for drop-in replacement)
            ws.on_upgrade(move |socket| handle_connection(socket, nfc_cmd_tx, events))
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    info!("WebSocket server running on ws://{}", addr);
    warp::serve(routes).run(addr).await;
}

async fn handle_connection(
    ws: warp::ws::WebSocket,
    nfc_cmd_tx: Sender<NfcCommand>,
    events: broadcast::Sender<OutgoingMessage>,
) {
    let (mut client_ws_tx, mut client_ws_rx) = ws.split();
    let mut rx_broadcast = events.subscribe();
    // Replies meant for this client only
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<OutgoingMessage>();

    // Broadcasts and replies -> Client
    let send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                msg = rx_broadcast.recv() => match msg {
                    Ok(msg) => msg,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WS client lagged, {} events dropped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(msg) = reply_rx.recv() => msg,
            };

            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize {:?}: {}", msg, e);
                    continue;
                }
            };
            if client_ws_tx
                .send(warp::ws::Message::text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Client -> NFC commands
    while let Some(result) = client_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("WS receive error: {}", e);
                break;
            }
        };
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_str() else {
            continue;
        };

        let reply = match serde_json::from_str::<IncomingMessage>(text) {
            Ok(parsed) => match to_command(parsed) {
                Ok(cmd) => {
                    debug!("Incoming command: {:?}", cmd);
                    let _ = nfc_cmd_tx.send(cmd);
                    None
                }
                Err(message) => Some(message),
            },
            Err(e) => Some(format!("Unrecognised message: {}", e)),
        };
        if let Some(message) = reply {
            let _ = reply_tx.send(OutgoingMessage::BadArgs { message });
        }
    }

    send_task.abort();
}

/// Validates a client request. Empty write content never reaches the session.
fn to_command(msg: IncomingMessage) -> Result<NfcCommand, String> {
    let cmd = match msg {
        IncomingMessage::StartReading => NfcCommand::StartReading,
        IncomingMessage::StopReading => NfcCommand::StopReading,
        IncomingMessage::StartWriting { uid, content } => {
            if content.is_empty() {
                return Err("Missing content".to_string());
            }
            NfcCommand::StartWriting { uid, text: content }
        }
        IncomingMessage::CancelWriting => NfcCommand::CancelWriting,
        IncomingMessage::GetReaderStatus => NfcCommand::CheckReaderStatus,
    };
    Ok(cmd)
}
