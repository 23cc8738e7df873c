//! Block-aligned memo heap.
//!
//! File layout:
//! ```text
//! [HEADER] next free block (u32, big-endian) | block size (u16) | spaces
//!          occupies the first ceil(512 / block size) blocks
//! [BLOCK]  type (u32) | length (u32) | payload | 0x1A 0x1A | spaces to boundary
//! ```
//! Blocks are addressed by index (`offset = index * block size`). Unused
//! blocks between entries are zero-filled, so a zero type tag marks a free
//! block.

use crate::parser::endian::flip_endian;
use crate::parser::{DbfError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Bytes the header region must cover before the first usable block.
pub const MEMO_HEADER_SIZE: u32 = 512;
/// Type tag given to blocks created by this crate.
pub const MEMO_BLOCK_TYPE: u32 = 0x0008_FFFF;
/// Type tag of an unused block.
pub const FREE_BLOCK_TYPE: u32 = 0;
/// Trails every payload.
pub const MEMO_TERMINATOR: [u8; 2] = [0x1A, 0x1A];

const ENTRY_PREFIX: usize = 8;

/// One memo entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoBlock {
    pub kind: u32,
    payload: Vec<u8>,
    /// Blocks reserved for this entry, starting at its index.
    span: u32,
}

impl MemoBlock {
    /// Stored bytes, without prefix or terminator.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn span(&self) -> u32 {
        self.span
    }

    /// Payload decoded as UTF-8, lossily.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Blocks reserved when allocating a payload of `len` bytes:
/// one block for the entry prefix plus the payload and its terminator.
pub fn memo_span(len: usize, block_size: u16) -> u32 {
    let bs = block_size.max(1) as u64;
    let blocks = 1 + (len as u64 + MEMO_TERMINATOR.len() as u64).div_ceil(bs);
    u32::try_from(blocks).unwrap_or(u32::MAX)
}

/// Blocks physically written for a payload of `len` bytes.
fn entry_blocks(len: usize, block_size: u16) -> u32 {
    let bs = block_size.max(1) as u64;
    let blocks = ((ENTRY_PREFIX + len + MEMO_TERMINATOR.len()) as u64).div_ceil(bs);
    u32::try_from(blocks).unwrap_or(u32::MAX)
}

/// In-memory memo file.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoStore {
    blocks: BTreeMap<u32, MemoBlock>,
    block_size: u16,
    first_index: u32,
    next_free: u32,
}

impl MemoStore {
    pub const MIN_BLOCK_SIZE: u16 = 16;

    pub fn new(block_size: u16) -> Result<Self> {
        if block_size < Self::MIN_BLOCK_SIZE {
            return Err(DbfError::InvalidArgument(format!(
                "memo block size {} is below the minimum of {}",
                block_size,
                Self::MIN_BLOCK_SIZE
            )));
        }

        let first_index = MEMO_HEADER_SIZE.div_ceil(block_size as u32);
        Ok(Self {
            blocks: BTreeMap::new(),
            block_size,
            first_index,
            next_free: first_index,
        })
    }

    /// Read a whole memo file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        debug!("Loading memo file {} ({} bytes)", path.display(), data.len());
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 6 {
            return Err(DbfError::Parse(format!(
                "memo file too small: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let mut header_next_free = cursor.read_u32::<LittleEndian>()?;
        flip_endian(&mut header_next_free);
        let block_size = cursor.read_u16::<LittleEndian>()?;

        let mut store = Self::new(block_size).map_err(|_| {
            DbfError::Parse(format!("invalid memo block size {}", block_size))
        })?;

        let bs = block_size as usize;
        let num_blocks = data.len() / bs;
        let mut index = store.first_index as usize;
        let mut occupied: Vec<(u32, MemoBlock)> = Vec::new();

        while index < num_blocks {
            let offset = index * bs;
            let mut cursor = Cursor::new(&data[offset..]);
            let kind = cursor.read_u32::<LittleEndian>()?;
            if kind == FREE_BLOCK_TYPE {
                index += 1;
                continue;
            }

            let length = cursor.read_u32::<LittleEndian>()? as usize;
            let start = offset + ENTRY_PREFIX;
            let end = start
                .checked_add(length)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| {
                    DbfError::Parse(format!(
                        "memo block {} claims {} bytes past end of file",
                        index, length
                    ))
                })?;

            occupied.push((
                index as u32,
                MemoBlock {
                    kind,
                    payload: data[start..end].to_vec(),
                    span: 0,
                },
            ));

            index += 1 + length.div_ceil(bs);
        }

        // Each block owns the room up to its successor.
        let scan_end = index as u32;
        let mut following = scan_end;
        for (block_index, mut block) in occupied.into_iter().rev() {
            block.span = following - block_index;
            following = block_index;
            store.blocks.insert(block_index, block);
        }

        store.next_free = header_next_free.max(scan_end).max(store.first_index);
        if header_next_free < scan_end {
            warn!(
                "Memo header next free block {} is behind the last entry, using {}",
                header_next_free, store.next_free
            );
        }

        debug!(
            "Memo store: {} blocks of {} bytes, next free {}",
            store.blocks.len(),
            block_size,
            store.next_free
        );

        Ok(store)
    }

    /// Serialize the whole store as a memo file.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bs = self.block_size as usize;

        let mut next_free = self.next_free;
        flip_endian(&mut next_free);
        writer.write_u32::<LittleEndian>(next_free)?;
        writer.write_u16::<LittleEndian>(self.block_size)?;
        let header_region = self.first_index as usize * bs;
        writer.write_all(&vec![b' '; header_region - 6])?;

        let free_block = vec![0u8; bs];
        let mut position = self.first_index;

        for (&index, block) in &self.blocks {
            if index < position {
                return Err(DbfError::Parse(format!(
                    "memo block {} overlaps the previous entry ending at block {}",
                    index, position
                )));
            }
            for _ in position..index {
                writer.write_all(&free_block)?;
            }

            let written = write_memo_block(writer, block, self.block_size)?;
            position = index + written;
        }

        Ok(())
    }

    /// Store `payload`, reusing the block at `existing` when it still fits.
    ///
    /// A payload whose span does not exceed the reserved span overwrites the
    /// old one in place. Anything larger moves to the next free block and
    /// the old entry is dropped.
    pub fn store(&mut self, existing: Option<u32>, payload: Vec<u8>) -> Result<u32> {
        if u32::try_from(payload.len()).is_err() {
            return Err(DbfError::InvalidArgument(format!(
                "memo payload of {} bytes does not fit a 32-bit length",
                payload.len()
            )));
        }

        let span = memo_span(payload.len(), self.block_size);

        if let Some(index) = existing {
            match self.blocks.get_mut(&index) {
                Some(block) if span <= block.span => {
                    block.payload = payload;
                    return Ok(index);
                }
                Some(_) => {
                    self.blocks.remove(&index);
                    debug!("Memo block {} outgrown, reallocating", index);
                }
                None => {}
            }
        }

        let index = self.next_free;
        self.next_free = index.checked_add(span).ok_or_else(|| {
            DbfError::InvalidArgument("memo file exceeds the addressable block range".to_string())
        })?;
        self.blocks.insert(
            index,
            MemoBlock {
                kind: MEMO_BLOCK_TYPE,
                payload,
                span,
            },
        );

        Ok(index)
    }

    /// Entry starting at block `index`.
    pub fn get(&self, index: u32) -> Option<&MemoBlock> {
        self.blocks.get(&index)
    }

    /// Raw bytes of the entry at `index`.
    pub fn payload(&self, index: u32) -> Option<&[u8]> {
        self.blocks.get(&index).map(MemoBlock::payload)
    }

    /// Whether an entry starts at `index`.
    pub fn contains(&self, index: u32) -> bool {
        self.blocks.contains_key(&index)
    }

    /// Drop an entry. Its blocks are written as free space on the next save.
    pub fn remove(&mut self, index: u32) -> Option<MemoBlock> {
        self.blocks.remove(&index)
    }

    /// Entries in block order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &MemoBlock)> {
        self.blocks.iter().map(|(&index, block)| (index, block))
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block_size(&self) -> u16 {
        self.block_size
    }

    /// First block after the file header.
    pub fn first_index(&self) -> u32 {
        self.first_index
    }

    /// Where the next new entry will be placed.
    pub fn next_free(&self) -> u32 {
        self.next_free
    }

    /// Blocks a payload of `len` bytes reserves in this store.
    pub fn span_for(&self, len: usize) -> u32 {
        memo_span(len, self.block_size)
    }
}

/// Write one entry: type, length, payload, terminator and space padding up
/// to the next block boundary. Returns the number of blocks written.
pub fn write_memo_block<W: Write>(writer: &mut W, block: &MemoBlock, block_size: u16) -> Result<u32> {
    let length = u32::try_from(block.payload.len()).map_err(|_| {
        DbfError::InvalidArgument("memo payload exceeds 32-bit length".to_string())
    })?;

    writer.write_u32::<LittleEndian>(block.kind)?;
    writer.write_u32::<LittleEndian>(length)?;
    writer.write_all(&block.payload)?;
    writer.write_all(&MEMO_TERMINATOR)?;

    let blocks = entry_blocks(block.payload.len(), block_size);
    let used = ENTRY_PREFIX + block.payload.len() + MEMO_TERMINATOR.len();
    let padding = blocks as usize * block_size as usize - used;
    writer.write_all(&vec![b' '; padding])?;

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_bytes(store: &MemoStore) -> Vec<u8> {
        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_first_index() {
        assert_eq!(MemoStore::new(512).unwrap().first_index(), 1);
        assert_eq!(MemoStore::new(64).unwrap().first_index(), 8);
        assert_eq!(MemoStore::new(100).unwrap().first_index(), 6);
        assert!(MemoStore::new(8).is_err());
    }

    #[test]
    fn test_span() {
        assert_eq!(memo_span(0, 512), 2);
        assert_eq!(memo_span(510, 512), 2);
        assert_eq!(memo_span(511, 512), 3);
        assert_eq!(memo_span(100, 64), 1 + 2);
    }

    #[test]
    fn test_allocation_advances_next_free() {
        let mut store = MemoStore::new(64).unwrap();
        let first = store.store(None, b"hello".to_vec()).unwrap();
        assert_eq!(first, 8);
        assert_eq!(store.next_free(), 8 + 1 + 1);

        let second = store.store(None, vec![b'x'; 100]).unwrap();
        assert_eq!(second, 10);
        assert_eq!(store.next_free(), 10 + 1 + 102usize.div_ceil(64) as u32);
    }

    #[test]
    fn test_rewrite_in_place_when_span_fits() {
        let mut store = MemoStore::new(64).unwrap();
        let index = store.store(None, vec![b'a'; 60]).unwrap();
        let next_free = store.next_free();

        let again = store.store(Some(index), b"short".to_vec()).unwrap();
        assert_eq!(again, index);
        assert_eq!(store.next_free(), next_free);
        assert_eq!(store.payload(index).unwrap(), b"short");

        // 62 bytes plus terminator still rounds to the same span.
        let again = store.store(Some(index), vec![b'b'; 62]).unwrap();
        assert_eq!(again, index);
    }

    #[test]
    fn test_rewrite_moves_when_span_grows() {
        let mut store = MemoStore::new(64).unwrap();
        let index = store.store(None, b"tiny".to_vec()).unwrap();
        let next_free = store.next_free();

        let payload = vec![b'z'; 300];
        let moved = store.store(Some(index), payload.clone()).unwrap();
        assert_eq!(moved, next_free);
        assert_eq!(store.next_free(), next_free + 1 + 302u32.div_ceil(64));
        assert!(!store.contains(index));
        assert_eq!(store.payload(moved).unwrap(), payload.as_slice());
    }

    #[test]
    fn test_dangling_index_allocates() {
        let mut store = MemoStore::new(512).unwrap();
        let index = store.store(Some(42), b"abc".to_vec()).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_header_layout() {
        let mut store = MemoStore::new(512).unwrap();
        store.store(None, b"abc".to_vec()).unwrap();
        let buf = to_bytes(&store);

        assert_eq!(&buf[0..4], &3u32.to_be_bytes());
        assert_eq!(&buf[4..6], &512u16.to_le_bytes());
        assert!(buf[6..512].iter().all(|&b| b == b' '));
        assert_eq!(buf.len(), 1024);
    }

    #[test]
    fn test_block_layout() {
        let mut store = MemoStore::new(512).unwrap();
        store.store(None, b"abc".to_vec()).unwrap();
        let buf = to_bytes(&store);
        let block = &buf[512..];

        assert_eq!(&block[0..4], &MEMO_BLOCK_TYPE.to_le_bytes());
        assert_eq!(&block[4..8], &3u32.to_le_bytes());
        assert_eq!(&block[8..11], b"abc");
        assert_eq!(&block[11..13], &MEMO_TERMINATOR);
        assert!(block[13..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_write_then_load() {
        let mut store = MemoStore::new(64).unwrap();
        let a = store.store(None, b"first memo".to_vec()).unwrap();
        let b = store.store(None, vec![b'q'; 200]).unwrap();
        let c = store.store(None, Vec::new()).unwrap();
        // Outgrow the first one to leave a hole behind it.
        let a = store.store(Some(a), vec![b'r'; 150]).unwrap();

        let loaded = MemoStore::from_bytes(&to_bytes(&store)).unwrap();
        assert_eq!(loaded.block_size(), 64);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.payload(a).unwrap(), vec![b'r'; 150].as_slice());
        assert_eq!(loaded.payload(b).unwrap(), vec![b'q'; 200].as_slice());
        assert_eq!(loaded.payload(c).unwrap(), b"");
        assert_eq!(loaded.next_free(), store.next_free());
    }

    #[test]
    fn test_loaded_span_reaches_next_entry() {
        let mut store = MemoStore::new(64).unwrap();
        let a = store.store(None, b"one".to_vec()).unwrap();
        let b = store.store(None, b"two".to_vec()).unwrap();

        let loaded = MemoStore::from_bytes(&to_bytes(&store)).unwrap();
        assert_eq!(loaded.get(a).unwrap().span(), b - a);
    }

    #[test]
    fn test_truncated_payload_is_parse_error() {
        let mut store = MemoStore::new(512).unwrap();
        store.store(None, b"abc".to_vec()).unwrap();
        let mut buf = to_bytes(&store);
        buf[516..520].copy_from_slice(&4096u32.to_le_bytes());

        let err = MemoStore::from_bytes(&buf).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_too_small() {
        assert!(MemoStore::from_bytes(&[0, 0, 0]).unwrap_err().is_corrupt());
    }
}
