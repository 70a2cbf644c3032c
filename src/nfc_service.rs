// src/nfc_service.rs
//! Command loop that feeds transport requests into the session controller.
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::{info, warn};

use nfc_session::NfcSession;
use nfc_session::reader::PcscDetection;
use nfc_session::types::{NfcCommand, OutgoingMessage};

pub fn run(
    session: NfcSession,
    detection: Arc<PcscDetection>,
    rx: Receiver<NfcCommand>,
    tx: Sender<OutgoingMessage>,
) {
    info!("Starting NFC command loop...");

    while let Ok(cmd) = rx.recv() {
        match cmd {
            NfcCommand::StartReading => session.start_reading(),
            NfcCommand::StopReading => session.stop_reading(),
            NfcCommand::StartWriting { uid, text } => {
                session.start_writing(uid.as_deref(), &text)
            }
            NfcCommand::CancelWriting => session.cancel_writing(),
            NfcCommand::CheckReaderStatus => {
                let success = match detection.reader_names() {
                    Ok(names) => !names.is_empty(),
                    Err(e) => {
                        warn!("Reader status check failed: {}", e);
                        false
                    }
                };
                let _ = tx.send(OutgoingMessage::ReaderStatus { success });
            }
        }
    }

    // All command senders are gone; release the reader.
    session.stop();
    info!("NFC command loop stopped");
}
