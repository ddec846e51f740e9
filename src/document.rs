//! Authoritative document state: content, version, and the committed
//! delta log.
//!
//! `apply_delta` is the single write path. It validates the author's base
//! version, rebases the delta past everything committed since that base,
//! applies the rebased ops all-or-nothing, and appends to the log. The
//! whole sequence runs under one acquisition of the document mutex, so no
//! reader ever observes a partially applied transaction.
//!
//! In practice only the owning hub's loop calls `apply_delta`; the mutex
//! also lets read-only snapshot endpoints share the document safely.

use parking_lot::Mutex;

use crate::protocol::{Delta, DocumentInfo, Operation};
use crate::transform::rebase;

/// Errors produced by [`Document::apply_delta`]. Each maps to a wire
/// `reason` string reported back to the author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The author claims a base version the server has not reached yet.
    VersionFromFuture { base: u64, version: u64 },
    /// Negative base version.
    InvalidBaseVersion { base: i64 },
    /// An op addresses positions outside the content after transform.
    OutOfRange { pos: usize, content_len: usize },
    /// An op carried a type tag outside the known set.
    UnknownOpType,
}

impl ApplyError {
    /// The wire `reason` string for the error envelope.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::VersionFromFuture { .. } => "VersionFromFuture",
            Self::InvalidBaseVersion { .. } => "InvalidBaseVersion",
            Self::OutOfRange { .. } => "OutOfRange",
            Self::UnknownOpType => "UnknownOpType",
        }
    }
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionFromFuture { base, version } => {
                write!(f, "base version {base} is ahead of document version {version}")
            }
            Self::InvalidBaseVersion { base } => write!(f, "invalid base version {base}"),
            Self::OutOfRange { pos, content_len } => {
                write!(f, "position {pos} out of range for content of {content_len} chars")
            }
            Self::UnknownOpType => write!(f, "unknown operation type"),
        }
    }
}

impl std::error::Error for ApplyError {}

struct DocState {
    content: String,
    version: u64,
    delta_log: Vec<Delta>,
}

/// One collaborative document.
pub struct Document {
    id: String,
    name: String,
    state: Mutex<DocState>,
}

impl Document {
    /// Create a document at version 0 with the given initial content.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: Mutex::new(DocState {
                content: content.into(),
                version: 0,
                delta_log: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current version (equals the number of committed deltas).
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Number of committed deltas.
    pub fn log_len(&self) -> usize {
        self.state.lock().delta_log.len()
    }

    /// Consistent snapshot for the HTTP surface and the init envelope.
    pub fn snapshot(&self) -> DocumentInfo {
        let state = self.state.lock();
        DocumentInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            content: state.content.clone(),
            version: state.version,
        }
    }

    /// Validate, rebase, apply, and commit one delta.
    ///
    /// On success returns the canonical rebased delta with `base_version`
    /// set to the new document version, ready for broadcast. On error the
    /// document is unchanged.
    pub fn apply_delta(&self, delta: &Delta) -> Result<Delta, ApplyError> {
        let mut state = self.state.lock();

        if delta.base_version < 0 {
            return Err(ApplyError::InvalidBaseVersion {
                base: delta.base_version,
            });
        }
        let base = delta.base_version as u64;
        if base > state.version {
            return Err(ApplyError::VersionFromFuture {
                base,
                version: state.version,
            });
        }

        // Rebase past every delta committed since the author's base.
        let mut working = delta.clone();
        for committed in &state.delta_log[base as usize..] {
            working.ops = rebase(&working, committed);
        }

        // All-or-nothing: apply to a scratch copy, commit only if every op
        // lands.
        let mut content = state.content.clone();
        for op in &working.ops {
            apply_op(&mut content, op).map_err(|e| {
                if matches!(op, Operation::Delete { .. }) {
                    log::warn!(
                        "doc {}: rejecting delta from {}: delete out of range after transform",
                        self.id,
                        delta.client_id
                    );
                }
                e
            })?;
        }

        let committed_at = state.version;
        state.content = content;
        state.version += 1;
        working.base_version = committed_at as i64;
        state.delta_log.push(working.clone());

        // Observers see the post-commit version.
        working.base_version = state.version as i64;
        Ok(working)
    }
}

/// Byte offset of the `index`-th character, accepting the one-past-the-end
/// position.
fn char_to_byte(s: &str, index: usize) -> Option<usize> {
    let mut count = 0;
    for (byte, _) in s.char_indices() {
        if count == index {
            return Some(byte);
        }
        count += 1;
    }
    if count == index {
        Some(s.len())
    } else {
        None
    }
}

fn apply_op(content: &mut String, op: &Operation) -> Result<(), ApplyError> {
    let content_len = content.chars().count();
    match op {
        Operation::Insert { pos, text } => {
            let at = char_to_byte(content, *pos).ok_or(ApplyError::OutOfRange {
                pos: *pos,
                content_len,
            })?;
            content.insert_str(at, text);
        }
        Operation::Delete { pos, length } => {
            let start = char_to_byte(content, *pos).ok_or(ApplyError::OutOfRange {
                pos: *pos,
                content_len,
            })?;
            let end =
                char_to_byte(content, pos + length).ok_or(ApplyError::OutOfRange {
                    pos: pos + length,
                    content_len,
                })?;
            content.replace_range(start..end, "");
        }
        Operation::Retain { .. } => {}
        Operation::Unknown => return Err(ApplyError::UnknownOpType),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(pos: usize, text: &str) -> Operation {
        Operation::Insert {
            pos,
            text: text.to_string(),
        }
    }

    fn del(pos: usize, length: usize) -> Operation {
        Operation::Delete { pos, length }
    }

    fn delta(client: &str, base: i64, ops: Vec<Operation>) -> Delta {
        Delta {
            client_id: client.to_string(),
            base_version: base,
            ops,
            timestamp: 0,
        }
    }

    fn content_of(doc: &Document) -> String {
        doc.snapshot().content
    }

    #[test]
    fn test_version_tracks_log_length() {
        let doc = Document::new("d", "test", "");
        for i in 0..5 {
            doc.apply_delta(&delta("a", i, vec![ins(0, "x")])).unwrap();
            assert_eq!(doc.version(), (i + 1) as u64);
            assert_eq!(doc.log_len(), (i + 1) as usize);
        }
    }

    #[test]
    fn test_replaying_log_rebuilds_content() {
        let doc = Document::new("d", "test", "seed");
        doc.apply_delta(&delta("a", 0, vec![ins(4, "ling")])).unwrap();
        doc.apply_delta(&delta("b", 1, vec![del(0, 1), ins(0, "f")]))
            .unwrap();
        doc.apply_delta(&delta("a", 1, vec![ins(4, "!")])).unwrap();

        let log = doc.state.lock().delta_log.clone();
        let replayed = Document::new("r", "replay", "seed");
        for (i, entry) in log.iter().enumerate() {
            // Log entries record the version they applied at.
            assert_eq!(entry.base_version, i as i64);
            replayed.apply_delta(entry).unwrap();
        }
        assert_eq!(content_of(&replayed), content_of(&doc));
    }

    #[test]
    fn test_current_base_applies_without_transform() {
        let doc = Document::new("d", "test", "abc");
        doc.apply_delta(&delta("a", 0, vec![ins(3, "d")])).unwrap();

        let out = doc
            .apply_delta(&delta("b", 1, vec![ins(0, "z")]))
            .unwrap();
        // Ops pass through untouched when the base is current.
        assert_eq!(out.ops, vec![ins(0, "z")]);
        assert_eq!(content_of(&doc), "zabcd");
    }

    #[test]
    fn test_broadcast_delta_carries_new_version() {
        let doc = Document::new("d", "test", "");
        let out = doc.apply_delta(&delta("a", 0, vec![ins(0, "x")])).unwrap();
        assert_eq!(out.base_version, 1);
        let out = doc.apply_delta(&delta("a", 1, vec![ins(1, "y")])).unwrap();
        assert_eq!(out.base_version, 2);
    }

    #[test]
    fn test_concurrent_inserts_different_positions() {
        // Content "abcdef" at version 2, built from two seed deltas.
        let doc = Document::new("d", "test", "");
        doc.apply_delta(&delta("seed", 0, vec![ins(0, "abc")])).unwrap();
        doc.apply_delta(&delta("seed", 1, vec![ins(3, "def")])).unwrap();
        assert_eq!(doc.version(), 2);

        let a = doc.apply_delta(&delta("A", 2, vec![ins(1, "X")])).unwrap();
        assert_eq!(a.ops, vec![ins(1, "X")]);
        assert_eq!(a.base_version, 3);

        let b = doc.apply_delta(&delta("B", 2, vec![ins(4, "Y")])).unwrap();
        // B's insert shifts right past A's earlier insert.
        assert_eq!(b.ops, vec![ins(5, "Y")]);
        assert_eq!(b.base_version, 4);

        assert_eq!(content_of(&doc), "aXbcdYef");
        assert_eq!(doc.version(), 4);
    }

    #[test]
    fn test_same_position_tie_break_converges() {
        // Both arrival orders must produce the same content.
        let first = Document::new("d1", "test", "");
        first.apply_delta(&delta("a", 0, vec![ins(0, "A")])).unwrap();
        first.apply_delta(&delta("b", 0, vec![ins(0, "B")])).unwrap();

        let second = Document::new("d2", "test", "");
        second.apply_delta(&delta("b", 0, vec![ins(0, "B")])).unwrap();
        second.apply_delta(&delta("a", 0, vec![ins(0, "A")])).unwrap();

        assert_eq!(content_of(&first), content_of(&second));
        assert_eq!(content_of(&first), "AB");
    }

    #[test]
    fn test_insert_into_concurrently_deleted_range() {
        // "hello" at v1; the delete of [1,4) commits first.
        let doc = Document::new("d", "test", "");
        doc.apply_delta(&delta("seed", 0, vec![ins(0, "hello")])).unwrap();

        doc.apply_delta(&delta("A", 1, vec![del(1, 3)])).unwrap();
        assert_eq!(content_of(&doc), "ho");

        let b = doc.apply_delta(&delta("B", 1, vec![ins(3, "X")])).unwrap();
        assert_eq!(b.ops, vec![ins(1, "X")]);
        assert_eq!(content_of(&doc), "hXo");
        assert_eq!(doc.version(), 3);
    }

    #[test]
    fn test_base_version_from_future_rejected() {
        let doc = Document::new("d", "test", "hello");
        let err = doc
            .apply_delta(&delta("a", 7, vec![ins(0, "x")]))
            .unwrap_err();
        assert_eq!(
            err,
            ApplyError::VersionFromFuture { base: 7, version: 0 }
        );
        assert_eq!(err.reason(), "VersionFromFuture");
        assert_eq!(content_of(&doc), "hello");
        assert_eq!(doc.version(), 0);
    }

    #[test]
    fn test_negative_base_version_rejected() {
        let doc = Document::new("d", "test", "");
        let err = doc
            .apply_delta(&delta("a", -1, vec![ins(0, "x")]))
            .unwrap_err();
        assert_eq!(err, ApplyError::InvalidBaseVersion { base: -1 });
        assert_eq!(err.reason(), "InvalidBaseVersion");
    }

    #[test]
    fn test_insert_at_both_boundaries() {
        let doc = Document::new("d", "test", "ab");
        doc.apply_delta(&delta("a", 0, vec![ins(0, ">")])).unwrap();
        doc.apply_delta(&delta("a", 1, vec![ins(3, "<")])).unwrap();
        assert_eq!(content_of(&doc), ">ab<");
    }

    #[test]
    fn test_insert_past_end_rejected() {
        let doc = Document::new("d", "test", "ab");
        let err = doc
            .apply_delta(&delta("a", 0, vec![ins(3, "x")]))
            .unwrap_err();
        assert_eq!(
            err,
            ApplyError::OutOfRange {
                pos: 3,
                content_len: 2
            }
        );
        assert_eq!(content_of(&doc), "ab");
    }

    #[test]
    fn test_delete_to_exact_end_succeeds() {
        let doc = Document::new("d", "test", "abcd");
        doc.apply_delta(&delta("a", 0, vec![del(2, 2)])).unwrap();
        assert_eq!(content_of(&doc), "ab");
    }

    #[test]
    fn test_delete_past_end_rejects_whole_delta() {
        let doc = Document::new("d", "test", "abcd");
        let err = doc
            .apply_delta(&delta("a", 0, vec![ins(0, "!"), del(2, 4)]))
            .unwrap_err();
        assert_eq!(err.reason(), "OutOfRange");
        // The leading insert must not have leaked.
        assert_eq!(content_of(&doc), "abcd");
        assert_eq!(doc.version(), 0);
    }

    #[test]
    fn test_failed_delta_rolls_back_entirely() {
        let doc = Document::new("d", "test", "ab");
        let err = doc
            .apply_delta(&delta("a", 0, vec![ins(2, "c"), ins(9, "x")]))
            .unwrap_err();
        assert_eq!(err.reason(), "OutOfRange");
        assert_eq!(content_of(&doc), "ab");
        assert_eq!(doc.log_len(), 0);
    }

    #[test]
    fn test_unknown_op_rejects_whole_delta() {
        let doc = Document::new("d", "test", "ab");
        let err = doc
            .apply_delta(&delta(
                "a",
                0,
                vec![ins(0, "x"), Operation::Unknown],
            ))
            .unwrap_err();
        assert_eq!(err, ApplyError::UnknownOpType);
        assert_eq!(content_of(&doc), "ab");
    }

    #[test]
    fn test_retain_has_no_content_effect() {
        let doc = Document::new("d", "test", "ab");
        let out = doc
            .apply_delta(&delta(
                "a",
                0,
                vec![Operation::Retain { pos: 0, length: 2 }, ins(2, "c")],
            ))
            .unwrap();
        assert_eq!(out.ops.len(), 2);
        assert_eq!(content_of(&doc), "abc");
        assert_eq!(doc.version(), 1);
    }

    #[test]
    fn test_full_rebase_from_version_zero() {
        let doc = Document::new("d", "test", "");
        doc.apply_delta(&delta("a", 0, vec![ins(0, "aaa")])).unwrap();
        doc.apply_delta(&delta("a", 1, vec![ins(3, "bbb")])).unwrap();
        doc.apply_delta(&delta("a", 2, vec![del(0, 2)])).unwrap();
        assert_eq!(content_of(&doc), "abbb");

        // A straggler based on version 0 inserts at 0; the tie-break ("z" >
        // "a") pushes it past both committed inserts, and the delete pulls
        // it back by two.
        let out = doc.apply_delta(&delta("z", 0, vec![ins(0, "Z")])).unwrap();
        assert_eq!(out.ops, vec![ins(4, "Z")]);
        assert_eq!(content_of(&doc), "abbbZ");
    }

    #[test]
    fn test_unicode_positions_are_char_offsets() {
        let doc = Document::new("d", "test", "héllo");
        doc.apply_delta(&delta("a", 0, vec![ins(5, "!")])).unwrap();
        assert_eq!(content_of(&doc), "héllo!");

        doc.apply_delta(&delta("a", 1, vec![del(1, 1)])).unwrap();
        assert_eq!(content_of(&doc), "hllo!");
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let doc = Document::new("id-1", "notes", "x");
        let snap = doc.snapshot();
        assert_eq!(snap.id, "id-1");
        assert_eq!(snap.name, "notes");
        assert_eq!(snap.content, "x");
        assert_eq!(snap.version, 0);
    }
}
