// src/cards.rs
use log::{debug, warn};
use pcsc::Card;

use crate::apdu;
use crate::error::{NdefError, TagError};
use crate::ndef;
use crate::types::CARD_TYPE_MIFARE_1K;

// Common MIFARE Classic transport and NDEF keys
pub const COMMON_KEYS: [[u8; 6]; 8] = [
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
    [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5],
    [0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD],
    [0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A],
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
];

const KEY_A: u8 = 0x60;
const KEY_B: u8 = 0x61;

const MIFARE_BLOCK_SIZE: usize = 16;
const NTAG_PAGE_SIZE: usize = 4;
const NTAG_CC_PAGE: u8 = 3;
const NTAG_FIRST_DATA_PAGE: u8 = 4;
const CC_MAGIC: u8 = 0xE1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardFamily {
    MifareClassic1K,
    Ntag,
}

impl CardFamily {
    /// PC/SC Part 3 ATRs carry a card name at bytes 13..15; older readers are
    /// recognised by the final ATR byte.
    pub fn from_atr(atr: &[u8]) -> Self {
        if atr.len() >= 15 && atr[7..12] == [0xA0, 0x00, 0x00, 0x03, 0x06] {
            return match (atr[13], atr[14]) {
                (0x00, 0x01) => CardFamily::MifareClassic1K,
                _ => CardFamily::Ntag,
            };
        }
        match atr.last() {
            Some(&CARD_TYPE_MIFARE_1K) => CardFamily::MifareClassic1K,
            _ => CardFamily::Ntag,
        }
    }
}

/// Type 2 tag capability container (page 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContainer {
    pub version: u8,
    pub data_area_len: usize,
    pub read_access: u8,
    pub write_access: u8,
}

impl CapabilityContainer {
    /// `None` unless the tag is NDEF formatted.
    pub fn parse(page: &[u8]) -> Option<Self> {
        match page {
            [CC_MAGIC, version, size, access, ..] => Some(CapabilityContainer {
                version: *version,
                data_area_len: *size as usize * 8,
                read_access: access >> 4,
                write_access: access & 0x0F,
            }),
            _ => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.write_access == 0x0
    }
}

/// Largest NDEF message that fits a data area once TLV framing is added.
pub fn max_message_len(data_area_len: usize) -> usize {
    if data_area_len >= 0xFF + 5 {
        data_area_len - 5
    } else {
        data_area_len.saturating_sub(3).min(0xFE)
    }
}

pub fn get_mifare_data_blocks() -> Vec<u8> {
    let mut blocks = Vec::new();
    // Sector 0 is usually read-only manufacturer data, so we start at Sector 1
    for sector in 1..16 {
        for block_in_sector in 0..3 {
            // 0, 1, 2 are data. 3 is the Trailer.
            blocks.push((sector * 4) + block_in_sector);
        }
    }
    blocks
}

pub fn mifare_data_area_len() -> usize {
    get_mifare_data_blocks().len() * MIFARE_BLOCK_SIZE
}

/// Pads to whole units; cards only accept full pages/blocks.
pub fn pad_to(data: &[u8], unit: usize) -> Vec<u8> {
    let mut padded = data.to_vec();
    let rem = padded.len() % unit;
    if rem != 0 {
        padded.resize(padded.len() + unit - rem, 0x00);
    }
    padded
}

/// Returns the NDEF message once the accumulated data holds a complete TLV.
/// `Ok(None)` asks for more data.
fn complete_message(data: &[u8]) -> Result<Option<Option<Vec<u8>>>, TagError> {
    match ndef::unwrap_tlv(data) {
        Ok(value) => Ok(Some(value.map(|v| v.to_vec()))),
        Err(NdefError::Truncated(_)) | Err(NdefError::NoNdefTlv) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn authenticate_sector(card: &Card, block: u8, key_types: &[u8]) -> Result<(), TagError> {
    for key in COMMON_KEYS.iter() {
        if apdu::load_key(card, key).is_err() {
            continue;
        }
        if key_types
            .iter()
            .any(|&kt| apdu::authenticate(card, block, kt).is_ok())
        {
            return Ok(());
        }
    }
    Err(TagError::Transport(format!(
        "could not authenticate sector at block {}",
        block
    )))
}

/// Raw NDEF message bytes from a MIFARE Classic 1K, `None` if the TLV is empty.
pub fn read_mifare(card: &Card) -> Result<Option<Vec<u8>>, TagError> {
    let mut full_data = Vec::new();

    for block in get_mifare_data_blocks() {
        // We must authenticate at the start of every sector (blocks 4, 8, 12, etc.)
        if block % 4 == 0 {
            if let Err(e) = authenticate_sector(card, block, &[KEY_A, KEY_B]) {
                warn!("{}; stopping read", e);
                break;
            }
        }

        full_data.extend(apdu::read_binary(card, block, MIFARE_BLOCK_SIZE as u8)?);
        if let Some(message) = complete_message(&full_data)? {
            return Ok(message);
        }
    }

    if full_data.is_empty() {
        return Err(TagError::Transport(
            "No data could be read from the card".into(),
        ));
    }
    debug!("No NDEF TLV in {} bytes of MIFARE data", full_data.len());
    Ok(None)
}

pub fn write_mifare(card: &Card, message: &[u8]) -> Result<(), TagError> {
    let data = pad_to(&ndef::wrap_in_tlv(message)?, MIFARE_BLOCK_SIZE);
    let blocks = get_mifare_data_blocks();
    if data.len() / MIFARE_BLOCK_SIZE > blocks.len() {
        return Err(TagError::Transport("message exceeds card capacity".into()));
    }

    for (chunk, &block) in data.chunks(MIFARE_BLOCK_SIZE).zip(blocks.iter()) {
        // Authenticate at the first data block of each sector
        if block % 4 == 0 {
            authenticate_sector(card, block, &[KEY_A])?;
        }
        apdu::update_binary(card, block, chunk)?;
    }
    Ok(())
}

pub fn read_ntag_cc(card: &Card) -> Result<Option<CapabilityContainer>, TagError> {
    let page = apdu::read_binary(card, NTAG_CC_PAGE, NTAG_PAGE_SIZE as u8)?;
    Ok(CapabilityContainer::parse(&page))
}

/// Raw NDEF message bytes from an NTAG/Ultralight, `None` if the TLV is empty.
pub fn read_ntag(card: &Card, cc: &CapabilityContainer) -> Result<Option<Vec<u8>>, TagError> {
    let last_page = NTAG_FIRST_DATA_PAGE as usize + cc.data_area_len / NTAG_PAGE_SIZE;
    let mut full_data = Vec::new();
    let mut page = NTAG_FIRST_DATA_PAGE as usize;

    // READ returns four pages at a time
    while page < last_page {
        full_data.extend(apdu::read_binary(card, page as u8, 16)?);
        if let Some(message) = complete_message(&full_data)? {
            return Ok(message);
        }
        page += 4;
    }
    debug!("No NDEF TLV in {} bytes of NTAG data", full_data.len());
    Ok(None)
}

pub fn write_ntag(card: &Card, message: &[u8]) -> Result<(), TagError> {
    // NTAG writes 4 bytes (1 page) at a time
    let data = pad_to(&ndef::wrap_in_tlv(message)?, NTAG_PAGE_SIZE);

    for (i, chunk) in data.chunks(NTAG_PAGE_SIZE).enumerate() {
        apdu::update_binary(card, NTAG_FIRST_DATA_PAGE + i as u8, chunk)?;
    }
    Ok(())
}
