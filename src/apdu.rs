// src/apdu.rs
// ACR122U pseudo-APDUs
use pcsc::Card;

use crate::error::TagError;

/// Splits a response into data and status word; `Err` carries a non-9000 SW.
pub fn split_status(resp: &[u8]) -> Result<&[u8], [u8; 2]> {
    match resp {
        [data @ .., 0x90, 0x00] => Ok(data),
        [.., sw1, sw2] => Err([*sw1, *sw2]),
        _ => Err([0x00, 0x00]),
    }
}

fn transmit(card: &Card, apdu: &[u8], what: &str) -> Result<Vec<u8>, TagError> {
    let mut recv_buffer = [0u8; 258];
    let resp = card.transmit(apdu, &mut recv_buffer).map_err(|e| match e {
        pcsc::Error::RemovedCard | pcsc::Error::ResetCard | pcsc::Error::NoSmartcard => {
            TagError::TagLost
        }
        e => TagError::Transport(format!("{}: {}", what, e)),
    })?;

    split_status(resp)
        .map(|data| data.to_vec())
        .map_err(|sw| TagError::Transport(format!("{} failed: SW {:02X}{:02X}", what, sw[0], sw[1])))
}

// Get Data (UID): FF CA 00 00 00
pub fn get_uid(card: &Card) -> Result<Vec<u8>, TagError> {
    transmit(card, &[0xFF, 0xCA, 0x00, 0x00, 0x00], "Get UID")
}

// Load Authentication Keys into Reader Memory (Location 0x00)
// ACR122U standard: FF 82 00 key_num 06 [KEY]
pub fn load_key(card: &Card, key: &[u8; 6]) -> Result<(), TagError> {
    let mut apdu = vec![0xFF, 0x82, 0x00, 0x00, 0x06];
    apdu.extend_from_slice(key);
    transmit(card, &apdu, "Load key").map(|_| ())
}

// Authenticate Block
// CMD: FF 86 00 00 05 01 00 Block KeyType KeyNumber
// KeyType: 0x60 (A), 0x61 (B)
pub fn authenticate(card: &Card, block: u8, key_type: u8) -> Result<(), TagError> {
    let apdu = [
        0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, block, key_type, 0x00,
    ];
    transmit(card, &apdu, "Authenticate").map(|_| ())
}

// Read: FF B0 00 Block Len
pub fn read_binary(card: &Card, block: u8, length: u8) -> Result<Vec<u8>, TagError> {
    transmit(card, &[0xFF, 0xB0, 0x00, block, length], "Read binary")
}

// Write: FF D6 00 Block Len [Data]
pub fn update_binary(card: &Card, block: u8, data: &[u8]) -> Result<(), TagError> {
    let mut apdu = vec![0xFF, 0xD6, 0x00, block, data.len() as u8];
    apdu.extend_from_slice(data);
    transmit(card, &apdu, "Update binary").map(|_| ())
}
