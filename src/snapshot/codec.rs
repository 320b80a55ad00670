//! Chain snapshot framing
//!
//! A snapshot is a block count followed by length-prefixed blocks:
//!
//! ```text
//! u32 LE  count
//! repeat count times, ascending height:
//!     i32 LE  length
//!     [u8]    canonical block bytes
//! ```
//!
//! The same stream may travel as the single entry of a ZIP archive.

use crate::core::block::{Block, BlockError};
use crate::core::ledger::Ledger;
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

// =============================================================================
// Constants
// =============================================================================

/// Default snapshot file and archive entry name
pub const SNAPSHOT_ENTRY: &str = "chain.acc";

/// Largest block length a snapshot may declare (32 MiB)
pub const MAX_BLOCK_LEN: usize = 0x0200_0000;

/// Local file header signature that opens every ZIP archive
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// Progress is logged every this many blocks
const PROGRESS_INTERVAL: u64 = 10_000;

// =============================================================================
// Errors
// =============================================================================

/// Ways a snapshot stream can be malformed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformation {
    NegativeLength(i32),
    OversizedLength(i32),
    Truncated,
    TrailingBytes,
}

impl std::fmt::Display for Malformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Malformation::NegativeLength(len) => write!(f, "negative block length {}", len),
            Malformation::OversizedLength(len) => {
                write!(f, "block length {} exceeds {} bytes", len, MAX_BLOCK_LEN)
            }
            Malformation::Truncated => f.write_str("stream ends early"),
            Malformation::TrailingBytes => f.write_str("bytes after the last block"),
        }
    }
}

/// Snapshot errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Malformed snapshot at block {height}: {kind}")]
    MalformedSnapshot { height: u64, kind: Malformation },
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Archive error: {0}")]
    Archive(#[from] ZipError),
    #[error("Archive has no entry named {0}")]
    MissingEntry(String),
    #[error("Snapshot declares {declared} blocks but {written} were written")]
    CountMismatch { declared: u32, written: u32 },
    #[error("Block is {0} bytes, larger than a snapshot can carry")]
    BlockTooLarge(usize),
    #[error("Ledger has no block at height {0}")]
    MissingBlock(u64),
    #[error("Ledger is too tall for a snapshot ({0} blocks)")]
    TooManyBlocks(u64),
    #[error("Block encoding failed: {0}")]
    Block(#[from] BlockError),
}

impl SnapshotError {
    /// True for errors caused by a corrupt stream rather than I/O
    pub fn is_malformed(&self) -> bool {
        matches!(self, SnapshotError::MalformedSnapshot { .. })
    }
}

// =============================================================================
// Reading
// =============================================================================

/// Block bytes read from a snapshot, not yet decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    /// Position in the stream, which is the block's height
    pub height: u64,
    pub bytes: Vec<u8>,
}

/// Forward-only reader over a raw snapshot stream
///
/// Yields one [`RawBlock`] per declared block and stops after the first
/// error.
pub struct SnapshotReader<R: Read> {
    reader: R,
    count: u32,
    next: u32,
    done: bool,
}

impl<R: Read> SnapshotReader<R> {
    /// Read the count header
    pub fn new(mut reader: R) -> Result<Self, SnapshotError> {
        let mut header = [0u8; 4];
        read_exact_or_truncated(&mut reader, &mut header, 0)?;
        Ok(Self {
            reader,
            count: u32::from_le_bytes(header),
            next: 0,
            done: false,
        })
    }

    /// Number of blocks the stream declares
    pub fn declared_count(&self) -> u32 {
        self.count
    }

    fn read_block(&mut self) -> Result<RawBlock, SnapshotError> {
        let height = u64::from(self.next);
        let mut prefix = [0u8; 4];
        read_exact_or_truncated(&mut self.reader, &mut prefix, height)?;

        let length = i32::from_le_bytes(prefix);
        if length < 0 {
            return Err(malformed(height, Malformation::NegativeLength(length)));
        }
        if length as usize > MAX_BLOCK_LEN {
            return Err(malformed(height, Malformation::OversizedLength(length)));
        }

        let mut bytes = Vec::with_capacity(length as usize);
        (&mut self.reader)
            .take(length as u64)
            .read_to_end(&mut bytes)?;
        if bytes.len() != length as usize {
            return Err(malformed(height, Malformation::Truncated));
        }

        self.next += 1;
        Ok(RawBlock { height, bytes })
    }

    fn check_end(&mut self) -> Result<(), SnapshotError> {
        let mut probe = [0u8; 1];
        loop {
            match self.reader.read(&mut probe) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    return Err(malformed(
                        u64::from(self.count),
                        Malformation::TrailingBytes,
                    ))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<R: Read> Iterator for SnapshotReader<R> {
    type Item = Result<RawBlock, SnapshotError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = if self.next == self.count {
            self.done = true;
            match self.check_end() {
                Ok(()) => return None,
                Err(e) => Err(e),
            }
        } else {
            self.read_block()
        };
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

impl<R: Read> std::iter::FusedIterator for SnapshotReader<R> {}

fn malformed(height: u64, kind: Malformation) -> SnapshotError {
    SnapshotError::MalformedSnapshot { height, kind }
}

fn read_exact_or_truncated<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    height: u64,
) -> Result<(), SnapshotError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => malformed(height, Malformation::Truncated),
        _ => SnapshotError::IoError(e),
    })
}

/// Open a snapshot, raw or archived, and hand its reader to `f`
///
/// Input starting with the ZIP signature is treated as an archive whose
/// entry `entry_name` holds the raw stream.
pub fn read_snapshot<R, T, F>(mut input: R, entry_name: &str, f: F) -> Result<T, SnapshotError>
where
    R: Read + Seek,
    F: FnOnce(SnapshotReader<&mut dyn Read>) -> T,
{
    let mut magic = Vec::with_capacity(4);
    (&mut input).take(4).read_to_end(&mut magic)?;
    input.seek(SeekFrom::Start(0))?;

    if magic == ZIP_MAGIC {
        let mut archive = ZipArchive::new(input)?;
        let mut entry = match archive.by_name(entry_name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                return Err(SnapshotError::MissingEntry(entry_name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let reader = SnapshotReader::new(&mut entry as &mut dyn Read)?;
        Ok(f(reader))
    } else {
        let reader = SnapshotReader::new(&mut input as &mut dyn Read)?;
        Ok(f(reader))
    }
}

// =============================================================================
// Writing
// =============================================================================

/// Writes a raw snapshot stream with a fixed declared count
pub struct SnapshotWriter<W: Write> {
    writer: W,
    declared: u32,
    written: u32,
}

impl<W: Write> SnapshotWriter<W> {
    /// Write the count header
    pub fn new(mut writer: W, count: u32) -> Result<Self, SnapshotError> {
        writer.write_all(&count.to_le_bytes())?;
        Ok(Self {
            writer,
            declared: count,
            written: 0,
        })
    }

    pub fn write_block(&mut self, block: &Block) -> Result<(), SnapshotError> {
        let bytes = block.to_bytes()?;
        self.write_raw(&bytes)
    }

    /// Append already-encoded block bytes
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        if self.written == self.declared {
            return Err(SnapshotError::CountMismatch {
                declared: self.declared,
                written: self.written.saturating_add(1),
            });
        }
        if bytes.len() > MAX_BLOCK_LEN {
            return Err(SnapshotError::BlockTooLarge(bytes.len()));
        }
        self.writer.write_all(&(bytes.len() as i32).to_le_bytes())?;
        self.writer.write_all(bytes)?;
        self.written += 1;
        Ok(())
    }

    /// Check every declared block was written and flush
    pub fn finish(mut self) -> Result<W, SnapshotError> {
        if self.written != self.declared {
            return Err(SnapshotError::CountMismatch {
                declared: self.declared,
                written: self.written,
            });
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

fn block_count(len: usize) -> Result<u32, SnapshotError> {
    u32::try_from(len).map_err(|_| SnapshotError::TooManyBlocks(len as u64))
}

/// Encode `blocks` as a raw snapshot
pub fn encode<W: Write>(blocks: &[Block], writer: W) -> Result<W, SnapshotError> {
    let mut snapshot = SnapshotWriter::new(writer, block_count(blocks.len())?)?;
    for block in blocks {
        snapshot.write_block(block)?;
    }
    snapshot.finish()
}

/// Encode `blocks` as a ZIP archive holding the raw snapshot
pub fn encode_archived<W: Write + Seek>(
    blocks: &[Block],
    writer: W,
    entry_name: &str,
) -> Result<W, SnapshotError> {
    let mut zip = ZipWriter::new(writer);
    zip.start_file(entry_name, archive_options())?;
    encode(blocks, &mut zip)?;
    Ok(zip.finish()?)
}

fn archive_options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Export every block of `ledger`, returning how many were written
pub fn export_ledger<L, W>(
    ledger: &L,
    writer: W,
    archive_entry: Option<&str>,
) -> Result<u32, SnapshotError>
where
    L: Ledger + ?Sized,
    W: Write + Seek,
{
    match archive_entry {
        Some(entry_name) => {
            let mut zip = ZipWriter::new(writer);
            zip.start_file(entry_name, archive_options())?;
            let count = write_ledger(ledger, &mut zip)?;
            zip.finish()?;
            Ok(count)
        }
        None => write_ledger(ledger, writer),
    }
}

fn write_ledger<L: Ledger + ?Sized, W: Write>(ledger: &L, writer: W) -> Result<u32, SnapshotError> {
    let total = ledger.current_height().map_or(0, |h| h.saturating_add(1));
    let count = u32::try_from(total).map_err(|_| SnapshotError::TooManyBlocks(total))?;

    let mut snapshot = SnapshotWriter::new(writer, count)?;
    for height in 0..u64::from(count) {
        let block = ledger
            .get_block(height)
            .ok_or(SnapshotError::MissingBlock(height))?;
        snapshot.write_block(&block)?;
        if (height + 1) % PROGRESS_INTERVAL == 0 {
            log::info!("Exported {}/{} blocks", height + 1, count);
        }
    }
    snapshot.finish()?;

    log::info!("Exported {} blocks", count);
    Ok(count)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn chain(len: u64) -> Vec<Block> {
        let mut blocks = vec![Block::genesis(Vec::new())];
        for _ in 1..len {
            let next = blocks[blocks.len() - 1].next(Vec::new());
            blocks.push(next);
        }
        blocks
    }

    fn frame(count: u32, blocks: &[&[u8]]) -> Vec<u8> {
        let mut out = count.to_le_bytes().to_vec();
        for bytes in blocks {
            out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
            out.extend_from_slice(bytes);
        }
        out
    }

    #[test]
    fn test_wire_layout() {
        let blocks = chain(2);
        let bytes = encode(&blocks, Vec::new()).unwrap();

        assert_eq!(&bytes[..4], &2u32.to_le_bytes());
        let first = blocks[0].to_bytes().unwrap();
        assert_eq!(&bytes[4..8], &(first.len() as i32).to_le_bytes());
        assert_eq!(&bytes[8..8 + first.len()], first.as_slice());
    }

    #[test]
    fn test_raw_round_trip() {
        let blocks = chain(3);
        let bytes = encode(&blocks, Vec::new()).unwrap();

        let reader = SnapshotReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.declared_count(), 3);
        let raw: Vec<RawBlock> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(raw.len(), 3);
        for (i, block) in raw.iter().enumerate() {
            assert_eq!(block.height, i as u64);
            assert_eq!(Block::from_bytes(&block.bytes).unwrap(), blocks[i]);
        }
    }

    #[test]
    fn test_archived_round_trip() {
        let blocks = chain(4);
        let archived = encode_archived(&blocks, Cursor::new(Vec::new()), SNAPSHOT_ENTRY)
            .unwrap()
            .into_inner();
        assert_eq!(&archived[..4], &ZIP_MAGIC);

        let decoded = read_snapshot(Cursor::new(archived), SNAPSHOT_ENTRY, |reader| {
            reader
                .map(|raw| Block::from_bytes(&raw.unwrap().bytes).unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();
        assert_eq!(decoded, blocks);
    }

    #[test]
    fn test_read_snapshot_sniffs_raw() {
        let blocks = chain(2);
        let bytes = encode(&blocks, Vec::new()).unwrap();
        let count = read_snapshot(Cursor::new(bytes), SNAPSHOT_ENTRY, |reader| reader.declared_count()).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_missing_archive_entry() {
        let archived = encode_archived(&chain(1), Cursor::new(Vec::new()), "other.acc")
            .unwrap()
            .into_inner();
        let err = read_snapshot(Cursor::new(archived), SNAPSHOT_ENTRY, |_| ()).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingEntry(_)));
    }

    #[test]
    fn test_empty_snapshot() {
        let bytes = encode(&[], Vec::new()).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        let mut reader = SnapshotReader::new(Cursor::new(bytes)).unwrap();
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_empty_archived_snapshot() {
        let archived = encode_archived(&[], Cursor::new(Vec::new()), SNAPSHOT_ENTRY)
            .unwrap()
            .into_inner();
        assert_eq!(&archived[..4], &ZIP_MAGIC);

        let (declared, blocks) = read_snapshot(Cursor::new(archived), SNAPSHOT_ENTRY, |reader| {
            (reader.declared_count(), reader.count())
        })
        .unwrap();
        assert_eq!(declared, 0);
        assert_eq!(blocks, 0);
    }

    #[test]
    fn test_negative_length() {
        let mut bytes = 1u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(-5i32).to_le_bytes());
        let mut reader = SnapshotReader::new(Cursor::new(bytes)).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert!(err.is_malformed());
        assert!(matches!(
            err,
            SnapshotError::MalformedSnapshot {
                height: 0,
                kind: Malformation::NegativeLength(-5)
            }
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_oversized_length() {
        let mut bytes = 1u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(MAX_BLOCK_LEN as i32 + 1).to_le_bytes());
        let mut reader = SnapshotReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(SnapshotError::MalformedSnapshot {
                kind: Malformation::OversizedLength(_),
                ..
            }))
        ));
    }

    #[test]
    fn test_truncated_block() {
        let mut bytes = frame(2, &[b"abc", b"defg"]);
        bytes.truncate(bytes.len() - 2);
        let mut reader = SnapshotReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().bytes, b"abc".to_vec());
        assert!(matches!(
            reader.next(),
            Some(Err(SnapshotError::MalformedSnapshot {
                height: 1,
                kind: Malformation::Truncated
            }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            SnapshotReader::new(Cursor::new(vec![1, 0])),
            Err(SnapshotError::MalformedSnapshot {
                kind: Malformation::Truncated,
                ..
            })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = frame(1, &[b"abc"]);
        bytes.push(0xFF);
        let results: Vec<_> = SnapshotReader::new(Cursor::new(bytes)).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            &results[1],
            Err(SnapshotError::MalformedSnapshot {
                kind: Malformation::TrailingBytes,
                ..
            })
        ));
    }

    #[test]
    fn test_writer_count_mismatch() {
        let mut writer = SnapshotWriter::new(Vec::new(), 2).unwrap();
        writer.write_raw(b"one").unwrap();
        assert!(matches!(
            writer.finish(),
            Err(SnapshotError::CountMismatch { declared: 2, written: 1 })
        ));

        let mut writer = SnapshotWriter::new(Vec::new(), 0).unwrap();
        assert!(matches!(
            writer.write_raw(b"extra"),
            Err(SnapshotError::CountMismatch { .. })
        ));
    }
}
