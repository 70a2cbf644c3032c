// src/types.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

pub const NO_NDEF_SUPPORT: &str = "<no NDEF support>";
pub const NO_TEXT: &str = "<no text>";
pub const UID_UNAVAILABLE: &str = "<unavailable>";

pub const CARD_TYPE_MIFARE_1K: u8 = 0x6A; // MIFARE Classic 1K

/// What the session does with the next detected tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OperationIntent {
    #[default]
    Idle,
    Reading,
    Writing {
        expected_uid: Option<TagUid>,
        text: String,
    },
}

impl OperationIntent {
    pub fn is_writing(&self) -> bool {
        matches!(self, OperationIntent::Writing { .. })
    }
}

/// Hardware identifier rendered as `XX:XX:...:XX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagUid(String);

impl TagUid {
    pub fn unavailable() -> Self {
        TagUid(UID_UNAVAILABLE.to_string())
    }

    pub fn from_identifier(id: Option<&[u8]>) -> Self {
        match id {
            Some(bytes) if !bytes.is_empty() => TagUid(format_uid(bytes)),
            _ => TagUid::unavailable(),
        }
    }

    /// Normalizes a caller-supplied UID requirement. Blank input means "any tag".
    /// Bare hex (`04a1b2`) gains separators; anything else is only uppercased.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        if !trimmed.contains(':') {
            if let Ok(bytes) = hex::decode(trimmed) {
                return Some(TagUid(format_uid(&bytes)));
            }
        }
        Some(TagUid(trimmed.to_ascii_uppercase()))
    }

    pub fn is_available(&self) -> bool {
        self.0 != UID_UNAVAILABLE
    }

    pub fn matches(&self, other: &TagUid) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn format_uid(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Tag technologies the detection capability polls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagTechnology {
    NfcA,
    NfcB,
    NfcF,
    NfcV,
}

pub const DEFAULT_MODES: [TagTechnology; 4] = [
    TagTechnology::NfcA,
    TagTechnology::NfcB,
    TagTechnology::NfcF,
    TagTechnology::NfcV,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeNameFormat {
    Empty,
    WellKnown,
    Mime,
    AbsoluteUri,
    External,
    Unknown,
    Unchanged,
    Reserved,
}

impl TypeNameFormat {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => TypeNameFormat::Empty,
            1 => TypeNameFormat::WellKnown,
            2 => TypeNameFormat::Mime,
            3 => TypeNameFormat::AbsoluteUri,
            4 => TypeNameFormat::External,
            5 => TypeNameFormat::Unknown,
            6 => TypeNameFormat::Unchanged,
            _ => TypeNameFormat::Reserved,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            TypeNameFormat::Empty => 0,
            TypeNameFormat::WellKnown => 1,
            TypeNameFormat::Mime => 2,
            TypeNameFormat::AbsoluteUri => 3,
            TypeNameFormat::External => 4,
            TypeNameFormat::Unknown => 5,
            TypeNameFormat::Unchanged => 6,
            TypeNameFormat::Reserved => 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: TypeNameFormat, // Type Name Format (How to interpret the type)
    pub record_type: Vec<u8>,
    pub id: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NdefMessage {
    pub records: Vec<NdefRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16,
}

/// Decoded well-known Text record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
    pub language: String,
    pub text: String,
    pub encoding: TextEncoding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub uid: TagUid,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Success,
    Failure(SessionError),
}

// Messages sent TO the WebSocket client (Frontend)
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutgoingMessage {
    CardRead { uid: String, content: String },
    WriteResult { success: bool, error: Option<String> },
    Error { message: String },
    ReaderStatus { success: bool },
    BadArgs { message: String },
}

// Messages received FROM the WebSocket client
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncomingMessage {
    StartReading,
    StopReading,
    StartWriting {
        #[serde(default)]
        uid: Option<String>,
        #[serde(default)]
        content: String,
    },
    CancelWriting,
    GetReaderStatus,
}

// Internal commands sent from WS Server -> NFC Thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfcCommand {
    StartReading,
    StopReading,
    StartWriting { uid: Option<String>, text: String },
    CancelWriting,
    CheckReaderStatus,
}
