use std::sync::Arc;

use crossbeam_channel::{Receiver, unbounded};
use parking_lot::Mutex;

use nfc_session::capability::{
    DetectCallback, DetectionCapability, LogDiagnostics, NdefTag, SessionCallbacks, TagHandle,
};
use nfc_session::ndef;
use nfc_session::types::{NdefMessage, OperationIntent, OutgoingMessage, TagTechnology, TagUid};
use nfc_session::{NfcSession, SessionConfig, TagError};

#[derive(Default)]
struct MockDetection {
    unavailable: bool,
    arm_fails: bool,
    callback: Mutex<Option<DetectCallback>>,
    armed_modes: Mutex<Vec<Vec<TagTechnology>>>,
    disarms: Mutex<usize>,
}

impl MockDetection {
    fn is_armed(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Delivers a tag the way a platform would, outside any internal lock.
    fn present(&self, tag: &mut MockTag) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            let handle: &mut dyn TagHandle = tag;
            callback(Some(handle));
        }
    }

    fn fire_empty(&self) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(None);
        }
    }
}

impl DetectionCapability for MockDetection {
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn arm(&self, modes: &[TagTechnology], on_detect: DetectCallback) -> Result<(), TagError> {
        if self.arm_fails {
            return Err(TagError::Transport("reader mode refused".into()));
        }
        self.armed_modes.lock().push(modes.to_vec());
        *self.callback.lock() = Some(on_detect);
        Ok(())
    }

    fn disarm(&self) {
        *self.disarms.lock() += 1;
        *self.callback.lock() = None;
    }
}

#[derive(Default)]
struct MockNdef {
    read_only: bool,
    capacity: usize,
    stored: Option<NdefMessage>,
    fail_connect: bool,
    fail_read: bool,
    fail_write: bool,
    fail_read_back: bool,
    fail_close: bool,
    written: bool,
    calls: Vec<&'static str>,
    // Runs while the write is in flight, connection still open
    during_write: Option<Box<dyn FnMut()>>,
}

impl NdefTag for MockNdef {
    fn connect(&mut self) -> Result<(), TagError> {
        self.calls.push("connect");
        if self.fail_connect {
            return Err(TagError::TagLost);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TagError> {
        self.calls.push("close");
        if self.fail_close {
            return Err(TagError::Transport("close refused".into()));
        }
        Ok(())
    }

    fn is_writable(&mut self) -> Result<bool, TagError> {
        self.calls.push("is_writable");
        Ok(!self.read_only)
    }

    fn max_size(&mut self) -> Result<usize, TagError> {
        self.calls.push("max_size");
        Ok(self.capacity)
    }

    fn read_message(&mut self) -> Result<Option<NdefMessage>, TagError> {
        self.calls.push("read_message");
        if self.fail_read || (self.written && self.fail_read_back) {
            return Err(TagError::Transport("I/O error".into()));
        }
        Ok(self.stored.clone())
    }

    fn write_message(&mut self, message: &NdefMessage) -> Result<(), TagError> {
        self.calls.push("write_message");
        if let Some(hook) = self.during_write.as_mut() {
            hook();
        }
        if self.fail_write {
            return Err(TagError::Transport("tag moved away".into()));
        }
        self.stored = Some(message.clone());
        self.written = true;
        Ok(())
    }
}

struct MockTag {
    uid: Option<Vec<u8>>,
    ndef: Option<MockNdef>,
}

impl MockTag {
    fn new(uid: &[u8], ndef: MockNdef) -> Self {
        MockTag {
            uid: Some(uid.to_vec()),
            ndef: Some(ndef),
        }
    }

    fn without_ndef(uid: &[u8]) -> Self {
        MockTag {
            uid: Some(uid.to_vec()),
            ndef: None,
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.ndef.as_ref().map(|n| n.calls.clone()).unwrap_or_default()
    }
}

impl TagHandle for MockTag {
    fn identifier(&mut self) -> Option<Vec<u8>> {
        self.uid.clone()
    }

    fn ndef(&mut self) -> Option<&mut dyn NdefTag> {
        let ndef: &mut dyn NdefTag = self.ndef.as_mut()?;
        Some(ndef)
    }
}

fn writable(capacity: usize) -> MockNdef {
    MockNdef {
        capacity,
        ..Default::default()
    }
}

fn setup(
    detection: MockDetection,
    config: SessionConfig,
) -> (NfcSession, Arc<MockDetection>, Receiver<OutgoingMessage>) {
    let detection = Arc::new(detection);
    let (tx, rx) = unbounded();
    let session = NfcSession::new(detection.clone(), tx, config);
    (session, detection, rx)
}

fn session() -> (NfcSession, Arc<MockDetection>, Receiver<OutgoingMessage>) {
    setup(MockDetection::default(), SessionConfig::default())
}

fn card_read(uid: &str, content: &str) -> OutgoingMessage {
    OutgoingMessage::CardRead {
        uid: uid.into(),
        content: content.into(),
    }
}

fn write_result(success: bool, error: Option<&str>) -> OutgoingMessage {
    OutgoingMessage::WriteResult {
        success,
        error: error.map(str::to_string),
    }
}

fn drain(rx: &Receiver<OutgoingMessage>) -> Vec<OutgoingMessage> {
    rx.try_iter().collect()
}

#[test]
fn successful_write_reports_read_back_then_success() {
    let (session, detection, rx) = session();
    session.start_writing(None, "hi");
    assert!(detection.is_armed());

    let mut tag = MockTag::new(&[0xDE, 0xAD, 0xBE, 0xEF], writable(64));
    detection.present(&mut tag);

    assert_eq!(
        drain(&rx),
        vec![card_read("DE:AD:BE:EF", "hi"), write_result(true, None)]
    );
    let stored = tag.ndef.as_ref().unwrap().stored.clone().unwrap();
    assert_eq!(stored.records[0].payload, vec![0x02, b'e', b'n', b'h', b'i']);
    assert_eq!(
        tag.calls(),
        vec![
            "connect",
            "is_writable",
            "max_size",
            "write_message",
            "read_message",
            "close"
        ]
    );

    // Still armed for the next tag
    assert!(detection.is_armed());
    assert!(session.intent().is_writing());
}

#[test]
fn write_uses_configured_language() {
    let config = SessionConfig {
        language: "de".into(),
        ..SessionConfig::default()
    };
    let (session, detection, rx) = setup(MockDetection::default(), config);
    assert_eq!(session.config().language, "de");
    session.start_writing(None, "Grüße");

    let mut tag = MockTag::new(&[0x01], writable(64));
    detection.present(&mut tag);

    assert_eq!(
        drain(&rx),
        vec![card_read("01", "Grüße"), write_result(true, None)]
    );
    let stored = tag.ndef.unwrap().stored.unwrap();
    assert_eq!(&stored.records[0].payload[..3], &[0x02, b'd', b'e']);
}

#[test]
fn wrong_tag_is_absorbed_silently() {
    let (session, detection, rx) = session();
    session.start_writing(Some("aa:bb"), "hi");

    let mut tag = MockTag::new(&[0xCC, 0xDD], writable(64));
    detection.present(&mut tag);

    assert!(drain(&rx).is_empty());
    assert!(tag.calls().is_empty());
    assert_eq!(
        session.intent(),
        OperationIntent::Writing {
            expected_uid: TagUid::parse("AA:BB"),
            text: "hi".into()
        }
    );
    assert!(detection.is_armed());

    // The right tag is still accepted afterwards
    let mut right = MockTag::new(&[0xAA, 0xBB], writable(64));
    detection.present(&mut right);
    assert_eq!(
        drain(&rx),
        vec![card_read("AA:BB", "hi"), write_result(true, None)]
    );
}

#[test]
fn bare_hex_requirement_matches_tag() {
    let (session, detection, rx) = session();
    session.start_writing(Some("04a1b2c3"), "hi");

    let mut tag = MockTag::new(&[0x04, 0xA1, 0xB2, 0xC3], writable(64));
    detection.present(&mut tag);
    assert_eq!(drain(&rx).last(), Some(&write_result(true, None)));
}

#[test]
fn unreadable_uid_never_matches_a_requirement() {
    let (session, detection, rx) = session();
    session.start_writing(Some("AA:BB"), "hi");

    let mut tag = MockTag {
        uid: None,
        ndef: Some(writable(64)),
    };
    detection.present(&mut tag);
    assert!(drain(&rx).is_empty());

    // Not even a requirement spelled like the placeholder
    session.start_writing(Some("<unavailable>"), "hi");
    detection.present(&mut tag);
    assert!(drain(&rx).is_empty());
}

#[test]
fn capacity_rejection_reports_byte_counts() {
    let (session, detection, rx) = session();
    // 4 header bytes + status + "en" + 5 text bytes = 12
    session.start_writing(None, "hello");

    let mut tag = MockTag::new(&[0x01, 0x02], writable(10));
    detection.present(&mut tag);

    assert_eq!(
        drain(&rx),
        vec![write_result(false, Some("Not enough space (need 12, have 10)"))]
    );
    assert!(!tag.calls().contains(&"write_message"));
    assert_eq!(tag.calls().last(), Some(&"close"));
}

#[test]
fn read_only_tag_is_rejected() {
    let (session, detection, rx) = session();
    session.start_writing(None, "hi");

    let mut tag = MockTag::new(
        &[0x01],
        MockNdef {
            read_only: true,
            capacity: 64,
            ..Default::default()
        },
    );
    detection.present(&mut tag);

    assert_eq!(drain(&rx), vec![write_result(false, Some("Tag is read-only"))]);
    assert!(!tag.calls().contains(&"write_message"));
    assert_eq!(tag.calls().last(), Some(&"close"));
}

#[test]
fn write_to_tag_without_ndef() {
    let (session, detection, rx) = session();
    session.start_writing(None, "hi");

    let mut tag = MockTag::without_ndef(&[0x01]);
    detection.present(&mut tag);

    assert_eq!(
        drain(&rx),
        vec![write_result(false, Some("Tag does not support NDEF"))]
    );
}

#[test]
fn write_failure_is_reported_and_connection_released() {
    let (session, detection, rx) = session();
    session.start_writing(None, "hi");

    let mut tag = MockTag::new(
        &[0x01],
        MockNdef {
            capacity: 64,
            fail_write: true,
            ..Default::default()
        },
    );
    detection.present(&mut tag);

    assert_eq!(
        drain(&rx),
        vec![write_result(false, Some("Write failed: tag moved away"))]
    );
    assert_eq!(tag.calls().last(), Some(&"close"));
}

#[test]
fn failed_connect_still_closes() {
    let (session, detection, rx) = session();
    session.start_writing(None, "hi");

    let mut tag = MockTag::new(
        &[0x01],
        MockNdef {
            capacity: 64,
            fail_connect: true,
            ..Default::default()
        },
    );
    detection.present(&mut tag);

    assert_eq!(
        drain(&rx),
        vec![write_result(false, Some("Write failed: Tag was lost"))]
    );
    assert_eq!(tag.calls(), vec!["connect", "close"]);
}

#[test]
fn read_back_failure_still_succeeds() {
    let (session, detection, rx) = session();
    session.start_writing(None, "hi");

    let mut tag = MockTag::new(
        &[0x01],
        MockNdef {
            capacity: 64,
            fail_read_back: true,
            ..Default::default()
        },
    );
    detection.present(&mut tag);

    assert_eq!(drain(&rx), vec![write_result(true, None)]);
}

#[test]
fn empty_pending_text_reports_no_data() {
    let (session, detection, rx) = session();
    session.start_writing(None, "");

    let mut tag = MockTag::new(&[0x01], writable(64));
    detection.present(&mut tag);

    assert_eq!(drain(&rx), vec![write_result(false, Some("No data to write"))]);
    assert!(tag.calls().is_empty());
}

#[test]
fn read_without_ndef_support() {
    let (session, detection, rx) = session();
    session.start_reading();

    let mut tag = MockTag::without_ndef(&[0xDE, 0xAD, 0xBE, 0xEF]);
    detection.present(&mut tag);

    assert_eq!(
        drain(&rx),
        vec![card_read("DE:AD:BE:EF", "<no NDEF support>")]
    );
    assert!(detection.is_armed());
}

#[test]
fn read_decodes_first_text_record() {
    let (session, detection, rx) = session();
    session.start_reading();

    let mut tag = MockTag::new(
        &[0x0A],
        MockNdef {
            stored: Some(ndef::text_message("hello tag", "en").unwrap()),
            ..Default::default()
        },
    );
    detection.present(&mut tag);

    assert_eq!(drain(&rx), vec![card_read("0A", "hello tag")]);
    assert_eq!(tag.calls(), vec!["connect", "read_message", "close"]);
}

#[test]
fn read_of_empty_tag_yields_placeholder() {
    let (session, detection, rx) = session();
    session.start_reading();

    let mut tag = MockTag::new(&[0x0A], MockNdef::default());
    detection.present(&mut tag);
    assert_eq!(drain(&rx), vec![card_read("0A", "<no text>")]);
}

#[test]
fn read_failure_reports_error() {
    let (session, detection, rx) = session();
    session.start_reading();

    let mut tag = MockTag::new(
        &[0x0A],
        MockNdef {
            fail_read: true,
            ..Default::default()
        },
    );
    detection.present(&mut tag);

    assert_eq!(
        drain(&rx),
        vec![OutgoingMessage::Error {
            message: "Read failed: I/O error".into()
        }]
    );
    assert_eq!(tag.calls().last(), Some(&"close"));
}

#[test]
fn reading_ignores_uid_requirement_of_previous_write() {
    let (session, detection, rx) = session();
    session.start_writing(Some("AA:BB"), "hi");
    session.start_reading();
    assert_eq!(session.intent(), OperationIntent::Reading);

    let mut tag = MockTag::without_ndef(&[0xCC]);
    detection.present(&mut tag);
    assert_eq!(drain(&rx), vec![card_read("CC", "<no NDEF support>")]);
}

#[test]
fn detection_without_tag_or_while_idle_is_ignored() {
    let (session, detection, rx) = session();
    session.start_reading();
    detection.fire_empty();
    assert!(drain(&rx).is_empty());

    let mut tag = MockTag::without_ndef(&[0x01]);
    let handle: &mut dyn TagHandle = &mut tag;
    session.stop();
    session.on_tag_detected(Some(handle));
    assert!(drain(&rx).is_empty());
}

#[test]
fn stop_is_idempotent() {
    let (session, detection, rx) = session();
    session.start_reading();
    session.stop();
    session.stop();

    assert_eq!(session.intent(), OperationIntent::Idle);
    assert!(!detection.is_armed());
    assert!(drain(&rx).is_empty());
}

#[test]
fn stop_during_write_does_not_preempt_it() {
    let (session, detection, rx) = session();
    session.start_writing(None, "hi");

    let stopper = session.clone();
    let mut tag = MockTag::new(
        &[0x01],
        MockNdef {
            capacity: 64,
            during_write: Some(Box::new(move || stopper.stop())),
            ..Default::default()
        },
    );
    detection.present(&mut tag);

    assert_eq!(
        drain(&rx),
        vec![card_read("01", "hi"), write_result(true, None)]
    );
    assert_eq!(session.intent(), OperationIntent::Idle);
    assert!(!detection.is_armed());
    assert_eq!(tag.calls().last(), Some(&"close"));
}

#[test]
fn cancel_during_write_does_not_preempt_it() {
    let (session, detection, rx) = session();
    session.start_writing(Some("01"), "hi");

    let canceller = session.clone();
    let mut tag = MockTag::new(
        &[0x01],
        MockNdef {
            capacity: 64,
            during_write: Some(Box::new(move || canceller.cancel_writing())),
            ..Default::default()
        },
    );
    detection.present(&mut tag);

    assert_eq!(
        drain(&rx),
        vec![card_read("01", "hi"), write_result(true, None)]
    );
    assert_eq!(session.intent(), OperationIntent::Idle);
    assert!(!detection.is_armed());
}

#[test]
fn cancel_writing_only_affects_writes() {
    let (session, detection, _rx) = session();
    session.start_reading();
    session.cancel_writing();
    assert_eq!(session.intent(), OperationIntent::Reading);
    assert!(detection.is_armed());

    session.start_writing(None, "hi");
    session.cancel_writing();
    assert_eq!(session.intent(), OperationIntent::Idle);
    assert!(!detection.is_armed());
}

#[test]
fn unavailable_capability_is_reported() {
    let (session, detection, rx) = setup(
        MockDetection {
            unavailable: true,
            ..Default::default()
        },
        SessionConfig::default(),
    );

    session.start_reading();
    session.start_writing(None, "hi");

    assert_eq!(
        drain(&rx),
        vec![
            OutgoingMessage::Error {
                message: "capability unavailable".into()
            },
            write_result(false, Some("capability unavailable")),
        ]
    );
    assert_eq!(session.intent(), OperationIntent::Idle);
    assert!(!detection.is_armed());
}

#[test]
fn arming_failure_resets_intent() {
    let (session, _detection, rx) = setup(
        MockDetection {
            arm_fails: true,
            ..Default::default()
        },
        SessionConfig::default(),
    );

    session.start_writing(None, "hi");
    assert_eq!(session.intent(), OperationIntent::Idle);
    assert_eq!(
        drain(&rx),
        vec![write_result(false, Some("capability unavailable"))]
    );
}

#[test]
fn arms_with_configured_modes() {
    let (session, detection, _rx) = session();
    session.start_reading();
    assert_eq!(
        detection.armed_modes.lock().as_slice(),
        &[vec![
            TagTechnology::NfcA,
            TagTechnology::NfcB,
            TagTechnology::NfcF,
            TagTechnology::NfcV
        ]]
    );
}

#[test]
fn invalidation_returns_to_idle_without_report() {
    let (session, _detection, rx) = session();
    session.start_writing(None, "hi");
    session.on_capability_invalidated("session timeout");

    assert_eq!(session.intent(), OperationIntent::Idle);
    assert!(drain(&rx).is_empty());
}

#[test]
fn auto_stop_after_write_disarms() {
    let config = SessionConfig {
        auto_stop_after_write: true,
        ..SessionConfig::default()
    };
    let (session, detection, rx) = setup(MockDetection::default(), config);
    session.start_writing(None, "hi");

    let mut tag = MockTag::new(&[0x01], writable(64));
    detection.present(&mut tag);

    assert_eq!(drain(&rx).last(), Some(&write_result(true, None)));
    assert_eq!(session.intent(), OperationIntent::Idle);
    assert!(!detection.is_armed());
}

#[test]
fn failed_write_does_not_auto_stop() {
    let config = SessionConfig {
        auto_stop_after_write: true,
        ..SessionConfig::default()
    };
    let (session, detection, _rx) = setup(MockDetection::default(), config);
    session.start_writing(None, "hi");

    let mut tag = MockTag::new(&[0x01], writable(4));
    detection.present(&mut tag);
    assert!(session.intent().is_writing());
}

#[test]
fn close_failures_go_to_diagnostics() {
    let detection = Arc::new(MockDetection::default());
    let diagnostics = Arc::new(LogDiagnostics::new());
    let (tx, rx) = unbounded();
    let session = NfcSession::with_diagnostics(
        detection.clone(),
        tx,
        diagnostics.clone(),
        SessionConfig::default(),
    );
    session.start_writing(None, "hi");

    let mut tag = MockTag::new(
        &[0x01],
        MockNdef {
            capacity: 64,
            fail_close: true,
            ..Default::default()
        },
    );
    detection.present(&mut tag);

    assert_eq!(drain(&rx).last(), Some(&write_result(true, None)));
    assert_eq!(diagnostics.suppressed_count(), 1);
}

/// Stops the session from inside its own write callback.
struct StopOnWrite {
    session: Mutex<Option<NfcSession>>,
    results: Mutex<Vec<bool>>,
}

impl SessionCallbacks for StopOnWrite {
    fn on_card_read(&self, _uid: &str, _content: &str) {}

    fn on_write_result(&self, success: bool, _error: Option<&str>) {
        self.results.lock().push(success);
        let session = self.session.lock().clone();
        if let Some(session) = session {
            session.stop();
        }
    }

    fn on_error(&self, _message: &str) {}
}

#[test]
fn callbacks_may_stop_the_session_reentrantly() {
    let detection = Arc::new(MockDetection::default());
    let callbacks = Arc::new(StopOnWrite {
        session: Mutex::new(None),
        results: Mutex::new(Vec::new()),
    });
    let session = NfcSession::new(
        detection.clone(),
        callbacks.clone(),
        SessionConfig::default(),
    );
    *callbacks.session.lock() = Some(session.clone());

    session.start_writing(None, "hi");
    let mut tag = MockTag::new(&[0x01], writable(64));
    detection.present(&mut tag);

    assert_eq!(*callbacks.results.lock(), vec![true]);
    assert_eq!(session.intent(), OperationIntent::Idle);
    assert!(!detection.is_armed());

    // Break the session <-> callbacks cycle
    callbacks.session.lock().take();
}

#[test]
fn dropping_the_session_disarms() {
    let (session, detection, _rx) = session();
    session.start_reading();
    drop(session);
    assert!(!detection.is_armed());
}
