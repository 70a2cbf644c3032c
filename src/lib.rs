//! NFC tag read/write session controller with an NDEF Text record codec.

pub mod apdu;
pub mod capability;
pub mod cards;
pub mod config;
pub mod error;
pub mod ndef;
pub mod reader;
pub mod session;
pub mod types;

pub use capability::{
    DetectCallback, DetectionCapability, Diagnostics, LogDiagnostics, NdefTag, SessionCallbacks,
    TagHandle,
};
pub use config::{Config, SessionConfig};
pub use error::{NdefError, SessionError, TagError};
pub use session::NfcSession;
pub use types::{NdefMessage, NdefRecord, OperationIntent, TagUid};
