//! Operational transformation over the insert/delete/retain operation set.
//!
//! `transform(a, b)` is right-biased: `b` is already committed and `a` is
//! rebased to apply after it. Rebasing a whole delta past a logged delta
//! transforms each incoming op past every logged op, in log order,
//! left-to-right.
//!
//! Two rules need care:
//! - concurrent inserts at the same position tie-break by lexicographic
//!   `client_id` (smaller keeps its position, larger shifts right), so every
//!   replica converges regardless of arrival order;
//! - a delete straddling a concurrent insert splits in two so the inserted
//!   text survives (split-to-preserve-insert).

use std::cmp::Ordering;

use crate::protocol::{Delta, Operation};

/// Rebase `a` to apply after `b`.
///
/// `a` and `b` are concurrent operations against the same base version.
/// Returns zero, one, or two operations: a delete fully shadowed by `b`
/// vanishes, and a delete straddling an insert splits.
pub fn transform(a: &Operation, b: &Operation, a_client: &str, b_client: &str) -> Vec<Operation> {
    match (a, b) {
        // Retains (and unknown ops, which never reach the log) carry no
        // content effect in either role.
        (Operation::Retain { .. }, _) | (Operation::Unknown, _) => vec![a.clone()],
        (_, Operation::Retain { .. }) | (_, Operation::Unknown) => vec![a.clone()],

        (
            Operation::Insert { pos: q, text },
            Operation::Insert {
                pos: p,
                text: b_text,
            },
        ) => {
            let l = b_text.chars().count();
            let pos = match q.cmp(p) {
                Ordering::Greater => q + l,
                Ordering::Less => *q,
                Ordering::Equal => {
                    if a_client <= b_client {
                        *q
                    } else {
                        q + l
                    }
                }
            };
            vec![Operation::Insert {
                pos,
                text: text.clone(),
            }]
        }

        (
            Operation::Delete { pos: q, length: m },
            Operation::Insert {
                pos: p,
                text: b_text,
            },
        ) => {
            let (q, m, p) = (*q, *m, *p);
            let l = b_text.chars().count();
            if q >= p {
                vec![Operation::Delete {
                    pos: q + l,
                    length: m,
                }]
            } else if q + m <= p {
                vec![a.clone()]
            } else {
                // The delete straddles the insert point: split around it.
                vec![
                    Operation::Delete {
                        pos: q,
                        length: p - q,
                    },
                    Operation::Delete {
                        pos: p + l,
                        length: m - (p - q),
                    },
                ]
            }
        }

        (
            Operation::Insert { pos: q, text },
            Operation::Delete { pos: p, length: l },
        ) => {
            let (q, p, l) = (*q, *p, *l);
            let pos = if q <= p {
                q
            } else if q >= p + l {
                q - l
            } else {
                // Insertion point was deleted; land at the collapsed point.
                p
            };
            vec![Operation::Insert {
                pos,
                text: text.clone(),
            }]
        }

        (
            Operation::Delete { pos: q, length: m },
            Operation::Delete { pos: p, length: l },
        ) => {
            let (q, m, p, l) = (*q, *m, *p, *l);
            if q + m <= p {
                vec![a.clone()]
            } else if q >= p + l {
                vec![Operation::Delete {
                    pos: q - l,
                    length: m,
                }]
            } else {
                // Overlap: only the portion outside [p, p+l) still exists.
                let prefix = p.saturating_sub(q);
                let suffix = (q + m).saturating_sub(p + l);
                let remaining = prefix + suffix;
                if remaining == 0 {
                    vec![]
                } else {
                    vec![Operation::Delete {
                        pos: q.min(p),
                        length: remaining,
                    }]
                }
            }
        }
    }
}

/// Rebase every op of `incoming` past every op of `committed`, in order,
/// flattening splits as they happen.
pub fn rebase(incoming: &Delta, committed: &Delta) -> Vec<Operation> {
    let mut ops = incoming.ops.clone();
    for b in &committed.ops {
        let mut next = Vec::with_capacity(ops.len());
        for a in &ops {
            next.extend(transform(a, b, &incoming.client_id, &committed.client_id));
        }
        ops = next;
    }
    ops
}
