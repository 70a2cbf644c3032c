// src/ndef.rs
use std::str;

use log::debug;

use crate::error::NdefError;
use crate::types::{NdefMessage, NdefRecord, TextEncoding, TextRecord, TypeNameFormat};

pub const RTD_TEXT: &[u8] = b"T";
pub const MAX_LANGUAGE_LEN: usize = 0x3F;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;

const STATUS_UTF16: u8 = 0x80;
const STATUS_LANG_MASK: u8 = 0x3F;

const TLV_NULL: u8 = 0x00;
const TLV_NDEF: u8 = 0x03;
const TLV_TERMINATOR: u8 = 0xFE;

impl NdefRecord {
    pub fn text(payload: Vec<u8>) -> Self {
        NdefRecord {
            tnf: TypeNameFormat::WellKnown,
            record_type: RTD_TEXT.to_vec(),
            id: None,
            payload,
        }
    }

    pub fn is_text(&self) -> bool {
        self.tnf == TypeNameFormat::WellKnown && self.record_type == RTD_TEXT
    }

    fn encode_into(&self, out: &mut Vec<u8>, mb: bool, me: bool) {
        // Bit 7: MB, Bit 6: ME, Bit 5: CF(0), Bit 4: SR, Bit 3: IL, Bits 2-0: TNF
        let short = self.payload.len() <= u8::MAX as usize;
        let mut header = self.tnf.bits();
        if mb {
            header |= FLAG_MB;
        }
        if me {
            header |= FLAG_ME;
        }
        if short {
            header |= FLAG_SR;
        }
        if self.id.is_some() {
            header |= FLAG_IL;
        }

        // Type and id lengths are single bytes on the wire
        debug_assert!(self.record_type.len() <= u8::MAX as usize);
        debug_assert!(self.id.as_ref().is_none_or(|id| id.len() <= u8::MAX as usize));

        out.push(header);
        out.push(self.record_type.len() as u8);
        if short {
            out.push(self.payload.len() as u8);
        } else {
            out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        }
        if let Some(id) = &self.id {
            out.push(id.len() as u8);
        }
        out.extend_from_slice(&self.record_type);
        if let Some(id) = &self.id {
            out.extend_from_slice(id);
        }
        out.extend_from_slice(&self.payload);
    }
}

impl NdefMessage {
    pub fn new(records: Vec<NdefRecord>) -> Self {
        NdefMessage { records }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let last = self.records.len().saturating_sub(1);
        for (i, record) in self.records.iter().enumerate() {
            record.encode_into(&mut out, i == 0, i == last);
        }
        out
    }

    /// Serialized size, the figure compared against a tag's capacity.
    pub fn byte_len(&self) -> usize {
        self.to_bytes().len()
    }

    /// Parses a raw NDEF message. Stops after the record flagged ME.
    pub fn parse(data: &[u8]) -> Result<Self, NdefError> {
        if data.is_empty() {
            return Err(NdefError::EmptyMessage);
        }

        let mut records = Vec::new();
        let mut cursor = Cursor { data, pos: 0 };

        while cursor.pos < data.len() {
            let header = cursor.byte()?;
            let tnf = TypeNameFormat::from_bits(header);
            let is_short_record = header & FLAG_SR != 0;
            let has_id = header & FLAG_IL != 0;
            let is_me = header & FLAG_ME != 0;

            let type_len = cursor.byte()? as usize;
            let payload_len = if is_short_record {
                cursor.byte()? as usize
            } else {
                let b = cursor.take(4)?;
                u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize
            };
            let id_len = if has_id { cursor.byte()? as usize } else { 0 };

            let record_type = cursor.take(type_len)?.to_vec();
            let id = if has_id {
                Some(cursor.take(id_len)?.to_vec())
            } else {
                None
            };
            let payload = cursor.take(payload_len)?.to_vec();

            if header & FLAG_CF != 0 {
                debug!("chunked NDEF record encountered; treating chunk as a record");
            }

            records.push(NdefRecord {
                tnf,
                record_type,
                id,
                payload,
            });

            if is_me {
                break;
            }
        }

        Ok(NdefMessage { records })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn byte(&mut self) -> Result<u8, NdefError> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], NdefError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(NdefError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// Text record payload: `[status] + language(ASCII) + text(UTF-8)`.
pub fn text_payload(text: &str, language: &str) -> Result<Vec<u8>, NdefError> {
    validate_language(language)?;
    let lang = language.as_bytes();

    let mut payload = Vec::with_capacity(1 + lang.len() + text.len());
    // Status byte: UTF-8 (bit 7=0) | Lang length (bits 0-5)
    payload.push(lang.len() as u8 & STATUS_LANG_MASK);
    payload.extend_from_slice(lang);
    payload.extend_from_slice(text.as_bytes());
    Ok(payload)
}

/// Single-record message holding one well-known Text record.
pub fn text_message(text: &str, language: &str) -> Result<NdefMessage, NdefError> {
    let payload = text_payload(text, language)?;
    Ok(NdefMessage::new(vec![NdefRecord::text(payload)]))
}

pub fn validate_language(language: &str) -> Result<(), NdefError> {
    if !language.is_ascii() || language.len() > MAX_LANGUAGE_LEN {
        return Err(NdefError::InvalidLanguage(language.to_string()));
    }
    Ok(())
}

/// Parses a Text record payload. An empty payload is an empty UTF-8 text.
pub fn decode_text_payload(payload: &[u8]) -> Option<TextRecord> {
    let Some(&status) = payload.first() else {
        return Some(TextRecord {
            language: String::new(),
            text: String::new(),
            encoding: TextEncoding::Utf8,
        });
    };

    let lang_len = (status & STATUS_LANG_MASK) as usize;
    let text_start = 1 + lang_len;
    if text_start > payload.len() {
        return None;
    }
    // A malformed language code never hides the text.
    let language = String::from_utf8_lossy(&payload[1..text_start]).into_owned();
    let body = &payload[text_start..];

    let (text, encoding) = if status & STATUS_UTF16 != 0 {
        (decode_utf16(body)?, TextEncoding::Utf16)
    } else {
        (str::from_utf8(body).ok()?.to_string(), TextEncoding::Utf8)
    };

    Some(TextRecord {
        language,
        text,
        encoding,
    })
}

/// Text of the first well-known "T" record in the message, if any decodes.
pub fn first_text(message: &NdefMessage) -> Option<String> {
    let record = message.records.iter().find(|r| r.is_text())?;
    decode_text_payload(&record.payload).map(|r| r.text)
}

// UTF-16 honours a byte order mark and defaults to big-endian.
fn decode_utf16(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let (little_endian, body) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => (false, bytes),
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| {
            if little_endian {
                u16::from_le_bytes([c[0], c[1]])
            } else {
                u16::from_be_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}

/// Frames an NDEF message in an NDEF TLV followed by a terminator TLV.
pub fn wrap_in_tlv(ndef_bytes: &[u8]) -> Result<Vec<u8>, NdefError> {
    let mut tlv = Vec::with_capacity(ndef_bytes.len() + 5);
    tlv.push(TLV_NDEF);

    // L: 1 byte below 0xFF, otherwise 0xFF followed by a 2-byte length
    if ndef_bytes.len() < 0xFF {
        tlv.push(ndef_bytes.len() as u8);
    } else {
        let len = u16::try_from(ndef_bytes.len())
            .map_err(|_| NdefError::TooLong(ndef_bytes.len()))?;
        tlv.push(0xFF);
        tlv.extend_from_slice(&len.to_be_bytes());
    }

    tlv.extend_from_slice(ndef_bytes);
    tlv.push(TLV_TERMINATOR);
    Ok(tlv)
}

/// Bytes a TLV frame adds around a message of `len` bytes.
pub fn tlv_overhead(len: usize) -> usize {
    if len < 0xFF { 3 } else { 5 }
}

/// Locates the NDEF TLV in a tag's data area and returns its value.
/// `Ok(None)` means the TLV is present but holds an empty message.
pub fn unwrap_tlv(buffer: &[u8]) -> Result<Option<&[u8]>, NdefError> {
    let mut cursor = Cursor {
        data: buffer,
        pos: 0,
    };

    loop {
        let tag = match cursor.byte() {
            Ok(tag) => tag,
            Err(_) => return Err(NdefError::NoNdefTlv),
        };
        match tag {
            TLV_NULL => continue,
            TLV_TERMINATOR => return Err(NdefError::NoNdefTlv),
            _ => {}
        }

        let len = match cursor.byte()? {
            0xFF => {
                let b = cursor.take(2)?;
                u16::from_be_bytes([b[0], b[1]]) as usize
            }
            short => short as usize,
        };
        let value = cursor.take(len)?;

        if tag == TLV_NDEF {
            return Ok((!value.is_empty()).then_some(value));
        }
    }
}
