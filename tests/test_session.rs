//! Integration tests for the background edit session.

mod common;

use common::single_page;
use pdf_patch::editor::SessionEvent;
use pdf_patch::mapping::scan_mapping;
use pdf_patch::object::ObjectRef;
use pdf_patch::tree::{DocumentTree, ObjectTree};
use pdf_patch::xref::anchor_chain;
use pdf_patch::{Edit, EditSession, Error, SessionConfig};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn open_session(config: SessionConfig, text: &str) -> (EditSession, Vec<u8>) {
    let base = single_page(text);
    let session = EditSession::spawn(config);
    assert_eq!(session.open(base.clone(), scan_mapping(&base)).unwrap(), 1);
    (session, base)
}

/// Debounce and reconcile timers long enough that they never fire in a test.
fn manual() -> SessionConfig {
    SessionConfig::new()
        .with_debounce(Duration::from_secs(600))
        .with_reconcile_idle(Duration::from_secs(600))
}

fn content(bytes: &[u8]) -> Vec<u8> {
    let tree = ObjectTree::parse(bytes).unwrap();
    tree.get(ObjectRef::new(5, 0)).unwrap().decode_stream_data().unwrap()
}

mod command_tests {
    use super::*;

    #[test]
    fn test_serial_appends_chain() {
        let (session, base) = open_session(manual(), "q Q");
        let first = session.apply_edits(vec![Edit::slot(0, 0, "(1) Tj")]).unwrap();
        let second = session.apply_edits(vec![Edit::slot(0, 0, "(2) Tj")]).unwrap();

        assert_eq!(&second[..first.len()], &first[..]);
        assert_eq!(&first[..base.len()], &base[..]);
        assert_eq!(anchor_chain(&second).unwrap().len(), 3);
        assert_eq!(session.bytes().unwrap(), Some(second.clone()));
        assert_eq!(content(&second), b"(2) Tj");
        session.shutdown().unwrap();
    }

    #[test]
    fn test_closed_writer_rejects_edits() {
        let session = EditSession::spawn(manual());
        assert!(matches!(
            session.apply_edits(vec![Edit::slot(0, 0, "x")]),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(session.bytes().unwrap(), None);
        assert_eq!(session.xref_state().unwrap(), None);
    }

    #[test]
    fn test_failed_batch_keeps_state() {
        let (session, base) = open_session(manual(), "q Q");
        let before = session.xref_state().unwrap().unwrap();
        assert!(matches!(
            session.apply_edits(vec![Edit::slot(0, 0, "x"), Edit::object(ObjectRef::new(4, 0), "x")]),
            Err(Error::EditResolution(_))
        ));
        assert_eq!(session.xref_state().unwrap(), Some(before));
        assert_eq!(session.bytes().unwrap(), Some(base));
    }
}

mod schedule_tests {
    use super::*;

    #[test]
    fn test_flush_without_pending_edits() {
        let (session, _) = open_session(manual(), "q Q");
        assert_eq!(session.flush().unwrap(), None);
    }

    #[test]
    fn test_later_edit_supersedes_pending() {
        let (session, _) = open_session(manual(), "q Q");
        session.schedule(Edit::slot(0, 0, "(old) Tj")).unwrap();
        session.schedule(Edit::slot(0, 0, "(new) Tj")).unwrap();

        let out = session.flush().unwrap().unwrap();
        assert_eq!(content(&out), b"(new) Tj");
        assert_eq!(anchor_chain(&out).unwrap().len(), 2);
        assert_eq!(session.flush().unwrap(), None);
    }

    #[test]
    fn test_debounced_append_emits_event() {
        let config = manual().with_debounce(Duration::from_millis(20));
        let (session, _) = open_session(config, "q Q");
        session.schedule(Edit::slot(0, 0, "(late) Tj")).unwrap();

        match session.events().recv_timeout(WAIT).unwrap() {
            SessionEvent::Appended { edits, len } => {
                assert_eq!(edits, 1);
                let bytes = session.bytes().unwrap().unwrap();
                assert_eq!(bytes.len(), len);
                assert_eq!(content(&bytes), b"(late) Tj");
            },
            other => panic!("expected an append, got {:?}", other),
        }
    }

    #[test]
    fn test_reconcile_due_after_idle() {
        let config = manual().with_reconcile_idle(Duration::from_millis(30));
        let (session, _) = open_session(config, "q Q");
        session.apply_edits(vec![Edit::slot(0, 0, "Q q")]).unwrap();

        assert_eq!(session.events().recv_timeout(WAIT).unwrap(), SessionEvent::ReconcileDue);
        // One notification per append.
        assert!(session.events().recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_shutdown_appends_pending_edits() {
        let (session, _) = open_session(manual(), "q Q");
        let events = session.events().clone();
        session.schedule(Edit::slot(0, 0, "(bye) Tj")).unwrap();
        session.shutdown().unwrap();

        assert!(matches!(
            events.recv_timeout(WAIT).unwrap(),
            SessionEvent::Appended { edits: 1, .. }
        ));
    }

    #[test]
    fn test_direct_append_drops_pending_edit() {
        let (session, _) = open_session(manual(), "q Q");
        session.schedule(Edit::slot(0, 0, "(old) Tj")).unwrap();
        let out = session.apply_edits(vec![Edit::slot(0, 0, "(new) Tj")]).unwrap();

        assert_eq!(session.flush().unwrap(), None);
        assert_eq!(session.bytes().unwrap(), Some(out.clone()));
        assert_eq!(content(&out), b"(new) Tj");
    }

    #[test]
    fn test_slot_and_reference_share_a_stream() {
        let (session, _) = open_session(manual(), "q Q");
        session.schedule(Edit::object(ObjectRef::new(5, 0), "(by ref) Tj")).unwrap();
        session.schedule(Edit::slot(0, 0, "(by slot) Tj")).unwrap();

        let out = session.flush().unwrap().unwrap();
        assert_eq!(content(&out), b"(by slot) Tj");
        assert_eq!(anchor_chain(&out).unwrap().len(), 2);

        session.schedule(Edit::slot(0, 0, "(stale) Tj")).unwrap();
        let out = session
            .apply_edits(vec![Edit::object(ObjectRef::new(5, 0), "(fresh) Tj")])
            .unwrap();
        assert_eq!(session.flush().unwrap(), None);
        assert_eq!(content(&out), b"(fresh) Tj");
    }

    #[test]
    fn test_failed_append_keeps_pending_edit() {
        let (session, _) = open_session(manual(), "q Q");
        session.schedule(Edit::slot(0, 0, "(kept) Tj")).unwrap();
        assert!(session
            .apply_edits(vec![Edit::slot(0, 0, "x"), Edit::slot(0, 4, "y")])
            .is_err());

        let out = session.flush().unwrap().unwrap();
        assert_eq!(content(&out), b"(kept) Tj");
    }
}
