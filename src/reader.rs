// src/reader.rs
use std::ffi::{CStr, CString};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use pcsc::{Card, Context, PNP_NOTIFICATION, Protocols, ReaderState, Scope, ShareMode, State};

use crate::capability::{DetectCallback, DetectionCapability, NdefTag, TagHandle};
use crate::cards::{self, CapabilityContainer, CardFamily};
use crate::error::TagError;
use crate::types::{NdefMessage, TagTechnology};

pub struct PcscDetection {
    poll_interval: Duration,
    // Stop flag of the currently running poller, if armed.
    active: Mutex<Option<Arc<AtomicBool>>>,
}

impl PcscDetection {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            active: Mutex::new(None),
        }
    }

    /// Names of the connected readers.
    pub fn reader_names(&self) -> Result<Vec<String>, TagError> {
        let ctx = establish()?;
        let mut readers_buf = [0; 2048];
        let names = ctx
            .list_readers(&mut readers_buf)
            .map_err(|e| TagError::Transport(e.to_string()))?
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        Ok(names)
    }
}

fn establish() -> Result<Context, TagError> {
    Context::establish(Scope::User).map_err(|e| TagError::Transport(e.to_string()))
}

impl DetectionCapability for PcscDetection {
    fn is_available(&self) -> bool {
        match establish() {
            Ok(_) => true,
            Err(e) => {
                warn!("PC/SC unavailable: {}", e);
                false
            }
        }
    }

    fn arm(&self, modes: &[TagTechnology], on_detect: DetectCallback) -> Result<(), TagError> {
        let ctx = establish()?;
        // Readers poll every technology they support; the request is advisory.
        debug!("Arming PC/SC detection for {:?}", modes);

        let stop = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self.active.lock().replace(stop.clone()) {
            previous.store(true, Ordering::SeqCst);
        }

        let poll_interval = self.poll_interval;
        std::thread::Builder::new()
            .name("nfc-pcsc-poll".into())
            .spawn(move || poll(ctx, poll_interval, stop, on_detect))
            .map_err(|e| TagError::Transport(e.to_string()))?;
        Ok(())
    }

    fn disarm(&self) {
        // Safe from inside a detection callback: the poller exits on its next turn.
        if let Some(stop) = self.active.lock().take() {
            stop.store(true, Ordering::SeqCst);
            info!("PC/SC detection disarmed");
        }
    }
}

fn poll(ctx: Context, poll_interval: Duration, stop: Arc<AtomicBool>, on_detect: DetectCallback) {
    info!("Starting PC/SC poller (event driven)...");

    let mut readers_buf = [0; 2048];
    let mut reader_names: Vec<CString> = Vec::new();
    let mut reader_states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];
    refresh_readers(&ctx, &mut readers_buf, &mut reader_names, &mut reader_states);

    while !stop.load(Ordering::SeqCst) {
        // 1. Wait for State Change
        if let Err(err) = ctx.get_status_change(poll_interval, &mut reader_states) {
            if err != pcsc::Error::Timeout {
                error!("PCSC Error: {}", err);
                std::thread::sleep(Duration::from_secs(1));
            }
            continue;
        }

        // 2. PROCESS EVENTS
        let mut readers_changed = false;

        // Check PnP (Index 0)
        if reader_states[0].event_state().intersects(State::CHANGED) {
            info!("Hardware change detected");
            readers_changed = true;
            reader_states[0].sync_current_state();
        }

        // Check Readers (Indices 1..)
        for i in 1..reader_states.len() {
            let rs = &reader_states[i];
            if !rs.event_state().intersects(State::CHANGED) {
                continue;
            }

            let inserted = rs.event_state().intersects(State::PRESENT)
                && !rs.current_state().intersects(State::PRESENT);
            let removed = rs.event_state().intersects(State::EMPTY)
                && rs.current_state().intersects(State::PRESENT);
            reader_states[i].sync_current_state();

            let name = &reader_names[i - 1];
            if inserted && !stop.load(Ordering::SeqCst) {
                info!("Card Inserted on {:?}", name);
                deliver(&ctx, name, &on_detect);
            }
            if removed {
                debug!("Card Removed from {:?}", name);
            }
        }

        // 3. REFRESH LIST
        if readers_changed {
            refresh_readers(&ctx, &mut readers_buf, &mut reader_names, &mut reader_states);
        }
    }

    info!("PC/SC poller stopped");
}

fn refresh_readers(
    ctx: &Context,
    readers_buf: &mut [u8],
    reader_names: &mut Vec<CString>,
    reader_states: &mut Vec<ReaderState>,
) {
    // Keep the PnP state (index 0) and rebuild everything else.
    reader_states.truncate(1);
    match ctx.list_readers(readers_buf) {
        Ok(iter) => {
            *reader_names = iter.map(CString::from).collect();
            for name in reader_names.iter() {
                reader_states.push(ReaderState::new(name.clone(), State::UNAWARE));
            }
            info!("{} reader(s) connected", reader_names.len());
        }
        Err(e) => {
            debug!("No readers listed: {}", e);
            reader_names.clear();
        }
    }
}

fn deliver(ctx: &Context, reader_name: &CStr, on_detect: &DetectCallback) {
    match ctx.connect(reader_name, ShareMode::Shared, Protocols::ANY) {
        Ok(card) => {
            let mut tag = PcscTag::new(card);
            let handle: &mut dyn TagHandle = &mut tag;
            on_detect(Some(handle));
        }
        Err(e) => error!("Failed to connect to card: {}", e),
    }
}

/// A card on a PC/SC reader for the duration of one detection.
pub struct PcscTag {
    ndef: PcscNdef,
    // Cached result of the NDEF probe.
    ndef_capable: Option<bool>,
}

struct PcscNdef {
    card: Card,
    family: CardFamily,
    cc: Option<CapabilityContainer>,
    connected: bool,
}

impl PcscTag {
    pub fn new(card: Card) -> Self {
        let mut names_buf = [0u8; 128];
        let mut atr_buf = [0u8; 64];
        let family = match card.status2(&mut names_buf, &mut atr_buf) {
            Ok(status) => CardFamily::from_atr(status.atr()),
            Err(e) => {
                debug!("Card status unavailable ({}); assuming NTAG", e);
                CardFamily::Ntag
            }
        };
        PcscTag {
            ndef: PcscNdef {
                card,
                family,
                cc: None,
                connected: false,
            },
            ndef_capable: None,
        }
    }

    fn probe_ndef(&mut self) -> bool {
        match self.ndef.family {
            CardFamily::MifareClassic1K => true,
            CardFamily::Ntag => match cards::read_ntag_cc(&self.ndef.card) {
                Ok(cc) => {
                    self.ndef.cc = cc;
                    cc.is_some()
                }
                Err(e) => {
                    debug!("Capability container unreadable: {}", e);
                    false
                }
            },
        }
    }
}

impl TagHandle for PcscTag {
    fn identifier(&mut self) -> Option<Vec<u8>> {
        match crate::apdu::get_uid(&self.ndef.card) {
            Ok(uid) => Some(uid),
            Err(e) => {
                debug!("UID unavailable: {}", e);
                None
            }
        }
    }

    fn ndef(&mut self) -> Option<&mut dyn NdefTag> {
        let capable = match self.ndef_capable {
            Some(capable) => capable,
            None => {
                let capable = self.probe_ndef();
                self.ndef_capable = Some(capable);
                capable
            }
        };
        if !capable {
            return None;
        }
        let ndef: &mut dyn NdefTag = &mut self.ndef;
        Some(ndef)
    }
}

impl PcscNdef {
    fn ensure_connected(&self) -> Result<(), TagError> {
        if self.connected {
            Ok(())
        } else {
            Err(TagError::NotConnected)
        }
    }

    fn ntag_cc(&self) -> Result<&CapabilityContainer, TagError> {
        self.cc
            .as_ref()
            .ok_or_else(|| TagError::Transport("tag is not NDEF formatted".into()))
    }
}

impl NdefTag for PcscNdef {
    // The card is already connected by the poller; this opens the NDEF session.
    fn connect(&mut self) -> Result<(), TagError> {
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TagError> {
        self.connected = false;
        Ok(())
    }

    fn is_writable(&mut self) -> Result<bool, TagError> {
        self.ensure_connected()?;
        match self.family {
            CardFamily::MifareClassic1K => Ok(true),
            CardFamily::Ntag => Ok(self.ntag_cc()?.is_writable()),
        }
    }

    fn max_size(&mut self) -> Result<usize, TagError> {
        self.ensure_connected()?;
        let area = match self.family {
            CardFamily::MifareClassic1K => cards::mifare_data_area_len(),
            CardFamily::Ntag => self.ntag_cc()?.data_area_len,
        };
        Ok(cards::max_message_len(area))
    }

    fn read_message(&mut self) -> Result<Option<NdefMessage>, TagError> {
        self.ensure_connected()?;
        let raw = match self.family {
            CardFamily::MifareClassic1K => cards::read_mifare(&self.card)?,
            CardFamily::Ntag => cards::read_ntag(&self.card, self.ntag_cc()?)?,
        };
        match raw {
            Some(bytes) => Ok(Some(NdefMessage::parse(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_message(&mut self, message: &NdefMessage) -> Result<(), TagError> {
        self.ensure_connected()?;
        let bytes = message.to_bytes();
        match self.family {
            CardFamily::MifareClassic1K => cards::write_mifare(&self.card, &bytes),
            CardFamily::Ntag => cards::write_ntag(&self.card, &bytes),
        }
    }
}
