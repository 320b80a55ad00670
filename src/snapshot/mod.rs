//! Chain snapshots
//!
//! Binary framing for bulk block transfer and its idempotent replay into
//! a ledger.

pub mod codec;
pub mod replay;

pub use codec::{
    encode, encode_archived, export_ledger, read_snapshot, Malformation, RawBlock, SnapshotError,
    SnapshotReader, SnapshotWriter, MAX_BLOCK_LEN, SNAPSHOT_ENTRY,
};
pub use replay::{CancelToken, ChainReplayer, ReplayError, ReplayReport};
