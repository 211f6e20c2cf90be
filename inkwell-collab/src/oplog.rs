//! Operation log with snapshot compaction for a single document.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  OperationLog                     │
//! │                                                  │
//! │  snapshot@r0 ◄── op r0+1 ◄── op r0+2 ◄── … ◄── op r │
//! │                                                  │
//! │  document = snapshot ∘ log[0] ∘ … ∘ log[last]    │
//! │  compaction: log.len() ≥ threshold → new snapshot │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Every accepted operation advances `revision` by exactly one. Compaction
//! folds the log into a new snapshot so that catch-up never replays more
//! than `threshold` operations.

use inkwell_ot::{OperationError, TextOperation};
use thiserror::Error;

use crate::protocol::ServerMessage;

/// Number of logged operations that triggers compaction.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 100;

/// Operation log errors.
#[derive(Debug, Error)]
pub enum OpLogError {
    /// The operation does not apply to the current document.
    #[error("operation rejected: {0}")]
    Compose(#[from] OperationError),

    /// A catch-up was requested from a revision the log has not reached.
    #[error("revision {requested} is ahead of current revision {current}")]
    FutureRevision { requested: u64, current: u64 },
}

/// Catch-up payload: a base document and the operations after it.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchUp {
    /// The document as of `base_revision`.
    pub base: TextOperation,
    pub base_revision: u64,
    /// Operations `base_revision + 1 ..= revision`, in order.
    pub operations: Vec<TextOperation>,
}

impl CatchUp {
    /// Revision reached after replaying the payload.
    pub fn revision(&self) -> u64 {
        self.base_revision + self.operations.len() as u64
    }

    /// Replay `operations` on top of `base`.
    pub fn replay(&self) -> Result<TextOperation, OperationError> {
        self.operations
            .iter()
            .try_fold(self.base.clone(), |doc, op| doc.compose(op))
    }

    pub fn into_message(self) -> ServerMessage {
        ServerMessage::DocumentSnapshot {
            revision: self.base_revision,
            document: self.base,
            operations: self.operations,
        }
    }
}

/// Counters for a single log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpLogStats {
    pub appended: u64,
    pub rejected: u64,
    pub compactions: u64,
}

/// Authoritative state of one document session.
#[derive(Debug, Clone)]
pub struct OperationLog {
    /// Full current text as a whole-document operation.
    document: TextOperation,
    /// Full text as of `snapshot_revision`.
    snapshot: TextOperation,
    snapshot_revision: u64,
    /// Operations accepted since `snapshot_revision`.
    log: Vec<TextOperation>,
    revision: u64,
    compaction_threshold: usize,
    stats: OpLogStats,
}

impl OperationLog {
    /// Create a log seeded with `initial_text` at revision 0.
    pub fn new(initial_text: &str, compaction_threshold: usize) -> Self {
        let compaction_threshold = compaction_threshold.max(1);
        let seed = TextOperation::from_text(initial_text);
        Self {
            document: seed.clone(),
            snapshot: seed,
            snapshot_revision: 0,
            log: Vec::with_capacity(compaction_threshold),
            revision: 0,
            compaction_threshold,
            stats: OpLogStats::default(),
        }
    }

    /// Create with the default compaction threshold (100 operations).
    pub fn with_defaults(initial_text: &str) -> Self {
        Self::new(initial_text, DEFAULT_COMPACTION_THRESHOLD)
    }

    /// Compose `op` onto the document and return the new revision.
    ///
    /// On error nothing changes and the revision does not advance.
    pub fn append(&mut self, op: TextOperation) -> Result<u64, OpLogError> {
        let document = match self.document.compose(&op) {
            Ok(doc) => doc,
            Err(e) => {
                self.stats.rejected += 1;
                return Err(e.into());
            }
        };

        self.document = document;
        self.log.push(op);
        self.revision += 1;
        self.stats.appended += 1;

        if self.needs_compaction() {
            self.compact();
        }
        Ok(self.revision)
    }

    /// Everything a client at `from_revision` needs to reach the current
    /// document.
    ///
    /// A revision older than the last compaction is answered from the
    /// snapshot; a revision in the future is an error.
    pub fn operations_since(&self, from_revision: u64) -> Result<CatchUp, OpLogError> {
        if from_revision > self.revision {
            return Err(OpLogError::FutureRevision {
                requested: from_revision,
                current: self.revision,
            });
        }
        if from_revision <= self.snapshot_revision {
            return Ok(self.full_catch_up());
        }

        let skip = (from_revision - self.snapshot_revision) as usize;
        let base = self.log[..skip]
            .iter()
            .try_fold(self.snapshot.clone(), |doc, op| doc.compose(op))?;

        Ok(CatchUp {
            base,
            base_revision: from_revision,
            operations: self.log[skip..].to_vec(),
        })
    }

    /// The snapshot plus the entire log.
    pub fn full_catch_up(&self) -> CatchUp {
        CatchUp {
            base: self.snapshot.clone(),
            base_revision: self.snapshot_revision,
            operations: self.log.clone(),
        }
    }

    /// The current document with an empty tail.
    pub fn current(&self) -> CatchUp {
        CatchUp {
            base: self.document.clone(),
            base_revision: self.revision,
            operations: Vec::new(),
        }
    }

    /// Whether the log has reached the compaction threshold.
    pub fn needs_compaction(&self) -> bool {
        self.log.len() >= self.compaction_threshold
    }

    /// Fold the log into a new snapshot. The document is unchanged.
    pub fn compact(&mut self) {
        if self.log.is_empty() {
            return;
        }
        log::debug!(
            "compacting {} operations into snapshot at revision {}",
            self.log.len(),
            self.revision
        );
        self.snapshot = self.document.clone();
        self.snapshot_revision = self.revision;
        self.log.clear();
        self.stats.compactions += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot_revision(&self) -> u64 {
        self.snapshot_revision
    }

    pub fn document(&self) -> &TextOperation {
        &self.document
    }

    pub fn snapshot(&self) -> &TextOperation {
        &self.snapshot
    }

    /// Operations since the last snapshot.
    pub fn log(&self) -> &[TextOperation] {
        &self.log
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Current document length in chars.
    pub fn len_chars(&self) -> usize {
        self.document.target_len()
    }

    /// Current document text.
    pub fn text(&self) -> String {
        self.document.as_text().unwrap_or_default()
    }

    pub fn compaction_threshold(&self) -> usize {
        self.compaction_threshold
    }

    pub fn stats(&self) -> OpLogStats {
        self.stats
    }
}
