//! Snapshot replay into a ledger
//!
//! Blocks are applied strictly in stream order. Anything at or below the
//! ledger's tip is skipped without being decoded, so replaying the same
//! snapshot twice, or resuming an interrupted import, only applies what is
//! missing.

use crate::core::block::{Block, BlockError};
use crate::core::ledger::{Ledger, LedgerError, VerificationSuspension};
use crate::snapshot::codec::{self, RawBlock, SnapshotError};
use std::io::{Read, Seek};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Progress is logged every this many applied blocks
const PROGRESS_INTERVAL: u64 = 10_000;

// =============================================================================
// Errors and Reports
// =============================================================================

/// Replay errors; each carries the height of the last block applied
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Snapshot error after height {last_applied:?}: {source}")]
    Snapshot {
        last_applied: Option<u64>,
        #[source]
        source: SnapshotError,
    },
    #[error("Block {height} could not be decoded: {source}")]
    Decode {
        height: u64,
        last_applied: Option<u64>,
        #[source]
        source: BlockError,
    },
    #[error("Block at stream position {expected} claims height {found}")]
    HeightMismatch {
        expected: u64,
        found: u64,
        last_applied: Option<u64>,
    },
    #[error("Ledger rejected block {height}: {source}")]
    Ledger {
        height: u64,
        last_applied: Option<u64>,
        #[source]
        source: LedgerError,
    },
    #[error("Block verification is already suspended by another import")]
    VerificationSuspended,
}

impl ReplayError {
    /// Height of the last block committed before the failure
    pub fn last_applied(&self) -> Option<u64> {
        match self {
            ReplayError::Snapshot { last_applied, .. }
            | ReplayError::Decode { last_applied, .. }
            | ReplayError::HeightMismatch { last_applied, .. }
            | ReplayError::Ledger { last_applied, .. } => *last_applied,
            ReplayError::VerificationSuspended => None,
        }
    }

    /// True when the snapshot itself is corrupt
    pub fn is_malformed(&self) -> bool {
        match self {
            ReplayError::Snapshot { source, .. } => source.is_malformed(),
            ReplayError::Decode { .. } | ReplayError::HeightMismatch { .. } => true,
            _ => false,
        }
    }
}

/// Outcome of a replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: u64,
    pub skipped: u64,
    pub last_applied: Option<u64>,
    /// Stopped early at a block boundary
    pub cancelled: bool,
}

// =============================================================================
// Cancellation
// =============================================================================

/// Shared flag asking a running replay to stop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Chain Replayer
// =============================================================================

/// Applies snapshot blocks to a ledger
pub struct ChainReplayer<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    suspend_verification: bool,
    cancel: CancelToken,
}

impl<'a, L: Ledger + ?Sized> ChainReplayer<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self {
            ledger,
            suspend_verification: true,
            cancel: CancelToken::new(),
        }
    }

    /// Whether block verification is turned off while replaying
    pub fn suspend_verification(mut self, suspend: bool) -> Self {
        self.suspend_verification = suspend;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Apply every block above the tip, in order
    ///
    /// `current_height` is the caller's view of the tip; the ledger's own
    /// tip is consulted before each block and the higher of the two wins.
    pub fn replay<I>(&self, blocks: I, current_height: Option<u64>) -> Result<ReplayReport, ReplayError>
    where
        I: IntoIterator<Item = Result<RawBlock, SnapshotError>>,
    {
        let _suspension = if self.suspend_verification {
            Some(
                VerificationSuspension::acquire(self.ledger)
                    .map_err(|_| ReplayError::VerificationSuspended)?,
            )
        } else {
            None
        };

        let mut report = ReplayReport::default();

        for item in blocks {
            if self.cancel.is_cancelled() {
                log::warn!(
                    "Import cancelled after height {:?} ({} blocks applied)",
                    report.last_applied,
                    report.applied
                );
                report.cancelled = true;
                break;
            }

            let last_applied = report.last_applied;
            let raw = item.map_err(|source| ReplayError::Snapshot {
                last_applied,
                source,
            })?;

            let tip = current_height.max(self.ledger.current_height());
            if tip.is_some_and(|tip| raw.height <= tip) {
                log::debug!("Skipping block {} (tip {:?})", raw.height, tip);
                report.skipped += 1;
                continue;
            }

            let block = Block::from_bytes(&raw.bytes).map_err(|source| ReplayError::Decode {
                height: raw.height,
                last_applied,
                source,
            })?;
            if block.index() != raw.height {
                return Err(ReplayError::HeightMismatch {
                    expected: raw.height,
                    found: block.index(),
                    last_applied,
                });
            }

            self.ledger
                .apply_block(block)
                .map_err(|source| ReplayError::Ledger {
                    height: raw.height,
                    last_applied,
                    source,
                })?;

            report.applied += 1;
            report.last_applied = Some(raw.height);
            if report.applied % PROGRESS_INTERVAL == 0 {
                log::info!("Imported {} blocks, height {}", report.applied, raw.height);
            }
        }

        log::info!(
            "Import finished: {} applied, {} skipped, tip {:?}",
            report.applied,
            report.skipped,
            self.ledger.current_height()
        );
        Ok(report)
    }

    /// Open a raw or archived snapshot and replay it
    pub fn import<R: Read + Seek>(&self, input: R, entry_name: &str) -> Result<ReplayReport, ReplayError> {
        let current_height = self.ledger.current_height();
        codec::read_snapshot(input, entry_name, |reader| {
            log::info!("Importing snapshot of {} blocks", reader.declared_count());
            self.replay(reader, current_height)
        })
        .map_err(|source| ReplayError::Snapshot {
            last_applied: None,
            source,
        })?
    }
}

// =============================================================================
// Tests
// =============================================================================
