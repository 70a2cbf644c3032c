// src/session.rs

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::capability::{
    DetectCallback, DetectionCapability, Diagnostics, LogDiagnostics, NdefTag, SessionCallbacks,
    TagHandle,
};
use crate::config::SessionConfig;
use crate::error::{SessionError, TagError};
use crate::ndef;
use crate::types::{NO_NDEF_SUPPORT, NO_TEXT, OperationIntent, ReadOutcome, TagUid, WriteOutcome};

/// Handle to a session controller. Clones share the same session.
#[derive(Clone)]
pub struct NfcSession {
    inner: Arc<Inner>,
}

struct Inner {
    intent: Mutex<OperationIntent>,
    // Held for the whole of one detection so detections never overlap.
    processing: Mutex<()>,
    detection: Box<dyn DetectionCapability>,
    callbacks: Box<dyn SessionCallbacks>,
    diagnostics: Box<dyn Diagnostics>,
    config: SessionConfig,
    this: Weak<Inner>,
}

impl NfcSession {
    pub fn new<D, C>(detection: D, callbacks: C, config: SessionConfig) -> Self
    where
        D: DetectionCapability + 'static,
        C: SessionCallbacks + 'static,
    {
        Self::with_diagnostics(detection, callbacks, LogDiagnostics::new(), config)
    }

    pub fn with_diagnostics<D, C, G>(
        detection: D,
        callbacks: C,
        diagnostics: G,
        config: SessionConfig,
    ) -> Self
    where
        D: DetectionCapability + 'static,
        C: SessionCallbacks + 'static,
        G: Diagnostics + 'static,
    {
        let inner = Arc::new_cyclic(|this| Inner {
            intent: Mutex::new(OperationIntent::Idle),
            processing: Mutex::new(()),
            detection: Box::new(detection),
            callbacks: Box::new(callbacks),
            diagnostics: Box::new(diagnostics),
            config,
            this: this.clone(),
        });
        NfcSession { inner }
    }

    pub fn start_reading(&self) {
        self.inner.start_reading()
    }

    /// `text` must be non-empty; the transport boundary rejects empty content.
    pub fn start_writing(&self, uid_requirement: Option<&str>, text: &str) {
        self.inner.start_writing(uid_requirement, text)
    }

    pub fn stop(&self) {
        self.inner.stop()
    }

    pub fn stop_reading(&self) {
        self.inner.stop()
    }

    pub fn cancel_writing(&self) {
        self.inner.cancel_writing()
    }

    /// The platform ended the polling session on its own.
    pub fn on_capability_invalidated(&self, reason: &str) {
        self.inner.on_capability_invalidated(reason)
    }

    pub fn on_tag_detected(&self, tag: Option<&mut dyn TagHandle>) {
        self.inner.on_tag_detected(tag)
    }

    pub fn intent(&self) -> OperationIntent {
        self.inner.intent.lock().clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl Inner {
    fn start_reading(&self) {
        if !self.detection.is_available() {
            warn!("start_reading: detection capability unavailable");
            self.callbacks
                .on_error(&SessionError::CapabilityUnavailable.to_string());
            return;
        }

        self.replace_intent(OperationIntent::Reading);
        if let Err(err) = self.arm() {
            warn!("start_reading: arming failed: {}", err);
            self.replace_intent(OperationIntent::Idle);
            self.callbacks
                .on_error(&SessionError::CapabilityUnavailable.to_string());
            return;
        }
        info!("Read session armed");
    }

    fn start_writing(&self, uid_requirement: Option<&str>, text: &str) {
        if !self.detection.is_available() {
            warn!("start_writing: detection capability unavailable");
            self.report_write(&WriteOutcome::Failure(SessionError::CapabilityUnavailable));
            return;
        }

        let expected_uid = uid_requirement.and_then(TagUid::parse);
        match &expected_uid {
            Some(uid) => info!("Write session armed for tag {}", uid),
            None => info!("Write session armed for any tag"),
        }
        self.replace_intent(OperationIntent::Writing {
            expected_uid,
            text: text.to_string(),
        });

        if let Err(err) = self.arm() {
            warn!("start_writing: arming failed: {}", err);
            self.replace_intent(OperationIntent::Idle);
            self.report_write(&WriteOutcome::Failure(SessionError::CapabilityUnavailable));
        }
    }

    fn arm(&self) -> Result<(), TagError> {
        let this = self.this.clone();
        let on_detect: DetectCallback = Arc::new(move |tag: Option<&mut dyn TagHandle>| {
            if let Some(inner) = this.upgrade() {
                inner.on_tag_detected(tag);
            }
        });
        self.detection.arm(&self.config.modes, on_detect)
    }

    fn stop(&self) {
        self.detection.disarm();
        let previous = self.replace_intent(OperationIntent::Idle);
        if previous != OperationIntent::Idle {
            info!("Session stopped");
        }
    }

    fn cancel_writing(&self) {
        {
            let mut intent = self.intent.lock();
            if !intent.is_writing() {
                return;
            }
            *intent = OperationIntent::Idle;
        }
        self.detection.disarm();
        info!("Write session cancelled");
    }

    fn on_capability_invalidated(&self, reason: &str) {
        let previous = self.replace_intent(OperationIntent::Idle);
        info!(
            "Detection session invalidated ({}); {:?} -> Idle",
            reason, previous
        );
    }

    fn replace_intent(&self, next: OperationIntent) -> OperationIntent {
        std::mem::replace(&mut *self.intent.lock(), next)
    }

    fn on_tag_detected(&self, tag: Option<&mut dyn TagHandle>) {
        let Some(tag) = tag else {
            debug!("Detection fired without a tag");
            return;
        };
        let _serial = self.processing.lock();

        let uid = TagUid::from_identifier(tag.identifier().as_deref());
        let intent = self.intent.lock().clone();

        match intent {
            OperationIntent::Idle => debug!("Tag {} detected while idle, ignoring", uid),
            OperationIntent::Reading => match self.read(tag, &uid) {
                Ok(outcome) => self.report_read(&outcome),
                Err(err) => {
                    warn!("Read from {} failed: {}", uid, err);
                    self.callbacks.on_error(&err.to_string());
                }
            },
            OperationIntent::Writing { expected_uid, text } => {
                if let Some(expected) = expected_uid {
                    if !uid.is_available() || !uid.matches(&expected) {
                        // Stay armed; the user may present the right tag next.
                        let err = SessionError::WrongTag {
                            expected: expected.to_string(),
                            actual: uid.to_string(),
                        };
                        debug!("{}", err);
                        return;
                    }
                }

                if text.is_empty() {
                    self.report_write(&WriteOutcome::Failure(SessionError::NoDataToWrite));
                    return;
                }

                let (outcome, read_back) = match self.write(tag, &uid, &text) {
                    Ok(read_back) => (WriteOutcome::Success, read_back),
                    Err(err) => {
                        warn!("Write to {} failed: {}", uid, err);
                        (WriteOutcome::Failure(err), None)
                    }
                };
                if let Some(read_back) = &read_back {
                    self.report_read(read_back);
                }
                self.report_write(&outcome);

                if outcome == WriteOutcome::Success && self.config.auto_stop_after_write {
                    self.stop();
                }
            }
        }
    }

    fn read(&self, tag: &mut dyn TagHandle, uid: &TagUid) -> Result<ReadOutcome, SessionError> {
        let Some(ndef_tag) = tag.ndef() else {
            return Ok(ReadOutcome {
                uid: uid.clone(),
                content: NO_NDEF_SUPPORT.to_string(),
            });
        };

        let mut conn =
            Connection::open(ndef_tag, &*self.diagnostics).map_err(SessionError::read_failed)?;
        let message = conn.read_message().map_err(SessionError::read_failed)?;

        Ok(ReadOutcome {
            uid: uid.clone(),
            content: text_or_placeholder(message.as_ref()),
        })
    }

    /// On success returns the read-back content, if verification could read it.
    fn write(
        &self,
        tag: &mut dyn TagHandle,
        uid: &TagUid,
        text: &str,
    ) -> Result<Option<ReadOutcome>, SessionError> {
        let ndef_tag = tag.ndef().ok_or(SessionError::NoNdefSupport)?;
        let mut conn =
            Connection::open(ndef_tag, &*self.diagnostics).map_err(SessionError::write_failed)?;

        if !conn.is_writable().map_err(SessionError::write_failed)? {
            return Err(SessionError::ReadOnlyTag);
        }

        let message = ndef::text_message(text, &self.config.language)?;
        let needed = message.byte_len();
        let available = conn.max_size().map_err(SessionError::write_failed)?;
        if needed > available {
            return Err(SessionError::InsufficientCapacity { needed, available });
        }

        conn.write_message(&message)
            .map_err(SessionError::write_failed)?;
        info!("Wrote {} byte NDEF message to {}", needed, uid);

        // Verification never downgrades a completed write.
        match conn.read_message() {
            Ok(read_back) => Ok(Some(ReadOutcome {
                uid: uid.clone(),
                content: text_or_placeholder(read_back.as_ref()),
            })),
            Err(err) => {
                warn!("Read-back after write to {} failed: {}", uid, err);
                Ok(None)
            }
        }
    }

    fn report_read(&self, outcome: &ReadOutcome) {
        self.callbacks
            .on_card_read(outcome.uid.as_str(), &outcome.content);
    }

    fn report_write(&self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Success => self.callbacks.on_write_result(true, None),
            WriteOutcome::Failure(err) => self
                .callbacks
                .on_write_result(false, Some(&err.to_string())),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.detection.disarm();
    }
}

fn text_or_placeholder(message: Option<&crate::types::NdefMessage>) -> String {
    message
        .and_then(ndef::first_text)
        .unwrap_or_else(|| NO_TEXT.to_string())
}

/// An open NDEF connection. Closing happens on drop, whatever the exit path;
/// a failed close goes to diagnostics and never masks the outcome.
struct Connection<'a> {
    tag: &'a mut dyn NdefTag,
    diagnostics: &'a dyn Diagnostics,
}

impl<'a> Connection<'a> {
    fn open(tag: &'a mut dyn NdefTag, diagnostics: &'a dyn Diagnostics) -> Result<Self, TagError> {
        let mut conn = Connection { tag, diagnostics };
        // A failed connect still drops `conn`, which closes the tag.
        conn.tag.connect()?;
        Ok(conn)
    }
}

impl<'a> Deref for Connection<'a> {
    type Target = dyn NdefTag + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.tag
    }
}

impl<'a> DerefMut for Connection<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.tag
    }
}

impl Drop for Connection<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.tag.close() {
            self.diagnostics.suppressed("close", &err);
        }
    }
}
