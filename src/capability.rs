// src/capability.rs
// Platform adapters implement these; the controller only sees the traits.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::Sender;
use log::warn;

use crate::error::TagError;
use crate::types::{NdefMessage, OutgoingMessage, TagTechnology};

/// Invoked once per detected tag. `None` when the platform fired without a tag.
pub type DetectCallback = Arc<dyn Fn(Option<&mut dyn TagHandle>) + Send + Sync>;

/// Polling session lifecycle.
///
/// Arming while already armed replaces the previous callback. Implementations
/// must deliver detections serially.
pub trait DetectionCapability: Send + Sync {
    fn is_available(&self) -> bool;

    fn arm(&self, modes: &[TagTechnology], on_detect: DetectCallback) -> Result<(), TagError>;

    fn disarm(&self);
}

/// A tag in the field, valid only for the duration of one detection callback.
pub trait TagHandle {
    /// Raw identifier bytes, `None` if the platform cannot read them.
    fn identifier(&mut self) -> Option<Vec<u8>>;

    /// NDEF access, `None` if the tag does not speak NDEF.
    fn ndef(&mut self) -> Option<&mut dyn NdefTag>;
}

pub trait NdefTag {
    fn connect(&mut self) -> Result<(), TagError>;

    fn close(&mut self) -> Result<(), TagError>;

    fn is_writable(&mut self) -> Result<bool, TagError>;

    /// Bytes available for an NDEF message.
    fn max_size(&mut self) -> Result<usize, TagError>;

    /// `Ok(None)` for a formatted tag holding no message.
    fn read_message(&mut self) -> Result<Option<NdefMessage>, TagError>;

    fn write_message(&mut self, message: &NdefMessage) -> Result<(), TagError>;
}

/// Outcome reports. Delivery context is up to the implementor.
pub trait SessionCallbacks: Send + Sync {
    fn on_card_read(&self, uid: &str, content: &str);

    fn on_write_result(&self, success: bool, error: Option<&str>);

    fn on_error(&self, message: &str);
}

impl SessionCallbacks for Sender<OutgoingMessage> {
    fn on_card_read(&self, uid: &str, content: &str) {
        let _ = self.send(OutgoingMessage::CardRead {
            uid: uid.to_string(),
            content: content.to_string(),
        });
    }

    fn on_write_result(&self, success: bool, error: Option<&str>) {
        let _ = self.send(OutgoingMessage::WriteResult {
            success,
            error: error.map(str::to_string),
        });
    }

    fn on_error(&self, message: &str) {
        let _ = self.send(OutgoingMessage::Error {
            message: message.to_string(),
        });
    }
}

/// Receives errors that are deliberately not reported, such as a failed close.
pub trait Diagnostics: Send + Sync {
    fn suppressed(&self, operation: &'static str, error: &TagError);
}

/// Logs suppressed errors at `warn` and counts them.
#[derive(Debug, Default)]
pub struct LogDiagnostics {
    suppressed: AtomicUsize,
}

impl LogDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suppressed_count(&self) -> usize {
        self.suppressed.load(Ordering::Relaxed)
    }
}

impl Diagnostics for LogDiagnostics {
    fn suppressed(&self, operation: &'static str, error: &TagError) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
        warn!("suppressed {} error: {}", operation, error);
    }
}

impl<T: DetectionCapability + ?Sized> DetectionCapability for Arc<T> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn arm(&self, modes: &[TagTechnology], on_detect: DetectCallback) -> Result<(), TagError> {
        (**self).arm(modes, on_detect)
    }

    fn disarm(&self) {
        (**self).disarm()
    }
}

impl<T: SessionCallbacks + ?Sized> SessionCallbacks for Arc<T> {
    fn on_card_read(&self, uid: &str, content: &str) {
        (**self).on_card_read(uid, content)
    }

    fn on_write_result(&self, success: bool, error: Option<&str>) {
        (**self).on_write_result(success, error)
    }

    fn on_error(&self, message: &str) {
        (**self).on_error(message)
    }
}

impl<T: Diagnostics + ?Sized> Diagnostics for Arc<T> {
    fn suppressed(&self, operation: &'static str, error: &TagError) {
        (**self).suppressed(operation, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn channel_callbacks_forward_messages() {
        let (tx, rx) = unbounded::<OutgoingMessage>();
        tx.on_card_read("AA:BB", "hi");
        tx.on_write_result(false, Some("Tag is read-only"));
        tx.on_error("capability unavailable");

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                OutgoingMessage::CardRead {
                    uid: "AA:BB".into(),
                    content: "hi".into()
                },
                OutgoingMessage::WriteResult {
                    success: false,
                    error: Some("Tag is read-only".into())
                },
                OutgoingMessage::Error {
                    message: "capability unavailable".into()
                },
            ]
        );
    }

    #[test]
    fn log_diagnostics_counts() {
        let diag = LogDiagnostics::new();
        diag.suppressed("close", &TagError::TagLost);
        diag.suppressed("close", &TagError::NotConnected);
        assert_eq!(diag.suppressed_count(), 2);
    }
}
