//! Block storage (§4.6): an in-memory backend for tests and short-lived
//! nodes, and a memory-mapped persistent backend for long-lived ones. Both
//! implement [`BlockStorage`].

use crate::block::Block;
use crate::error::{CoreError, Result};
use crate::traits::BlockStorage;
use solidus_common::ser::{Readable, Writeable, Writer};
use solidus_common::{Hash, Height, Signature};
use std::collections::HashMap;

/// An indexed append-only vector of encoded blocks.
#[derive(Debug, Default)]
pub struct MemoryBlockStorage {
    blocks: Vec<Block>,
    height_index: HashMap<Height, usize>,
    hash_index: HashMap<Hash, usize>,
}

impl MemoryBlockStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_invariants(&self) {
        debug_assert_eq!(self.height_index.len(), self.blocks.len());
        debug_assert_eq!(self.hash_index.len(), self.blocks.len());
    }
}

impl BlockStorage for MemoryBlockStorage {
    fn load(&mut self, genesis: &Block) -> Result<()> {
        if self.blocks.is_empty() {
            self.save_block(genesis)?;
        }
        Ok(())
    }

    fn read_last(&self) -> Result<Option<Block>> {
        Ok(self.blocks.last().cloned())
    }

    fn read_by_height(&self, height: Height) -> Result<Option<Block>> {
        Ok(self
            .height_index
            .get(&height)
            .map(|&idx| self.blocks[idx].clone()))
    }

    fn read_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        Ok(self
            .hash_index
            .get(hash)
            .map(|&idx| self.blocks[idx].clone()))
    }

    fn save_block(&mut self, block: &Block) -> Result<()> {
        let expected = self.blocks.len() as Height;
        if block.header.height != expected {
            return Err(CoreError::HeightOrderViolation {
                expected,
                got: block.header.height,
            });
        }
        let idx = self.blocks.len();
        self.height_index.insert(block.header.height, idx);
        self.hash_index.insert(block.hash(), idx);
        self.blocks.push(block.clone());
        self.check_invariants();
        Ok(())
    }

    fn update_block_sig(
        &mut self,
        height: Height,
        hash: &Hash,
        signature: Signature,
        validators: Vec<bool>,
    ) -> Result<()> {
        let idx = *self
            .height_index
            .get(&height)
            .ok_or_else(|| CoreError::BlockNotFound(format!("height {height}")))?;
        if self.blocks[idx].hash() != *hash {
            return Err(CoreError::InconsistentIndex(
                "hash does not match block at that height".into(),
            ));
        }
        self.blocks[idx].header.signature = signature;
        self.blocks[idx].header.validators = validators;
        Ok(())
    }
}

/// Byte layout constants for the persistent backend.
const MAP_SIZE: usize = 640 * 1024;
const CHECKSUM_SIZE: usize = 4;
const DATA_SIZE: usize = MAP_SIZE - CHECKSUM_SIZE;
const LEN_PREFIX_SIZE: usize = 4;
/// Bytes of a written block record before the fixed-width `signature` field:
/// `prev_block` (64) + `merkle_root` (64).
const SIGNATURE_FIELD_OFFSET: usize = 128;

#[derive(Debug, Clone, Copy)]
struct Position {
    file_index: usize,
    offset: usize,
    record_len: usize,
}

/// A memory-mapped append-only log split across fixed-size `MAP_SIZE` files.
/// Each file is checksummed as a whole; a block record that doesn't fit in
/// the current file's remaining space starts a fresh file rather than
/// spanning two (a deliberate simplification of the header's "may span
/// multiple files" allowance).
pub struct PersistentBlockStorage {
    base_dir: std::path::PathBuf,
    files: Vec<memmap2::MmapMut>,
    cursor: usize,
    height_index: std::collections::BTreeMap<Height, Position>,
    hash_index: HashMap<Hash, Position>,
}

impl PersistentBlockStorage {
    pub fn open(base_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|e| CoreError::Io(e.to_string()))?;
        let mut storage = Self {
            base_dir,
            files: Vec::new(),
            cursor: 0,
            height_index: std::collections::BTreeMap::new(),
            hash_index: HashMap::new(),
        };
        storage.reopen_existing()?;
        Ok(storage)
    }

    fn reopen_existing(&mut self) -> Result<()> {
        let mut index = 0;
        loop {
            let path = self.file_path(index);
            if !path.exists() {
                break;
            }
            let mmap = open_mmap(&path)?;
            verify_checksum(&mmap)?;
            self.files.push(mmap);
            index += 1;
        }
        let index_path = self.base_dir.join("index.dat");
        if index_path.exists() {
            let bytes = std::fs::read(&index_path).map_err(|e| CoreError::Io(e.to_string()))?;
            self.load_index(&bytes)?;
            self.cursor = self
                .height_index
                .values()
                .map(|p| p.offset + p.record_len)
                .max()
                .unwrap_or(0);
        }
        Ok(())
    }

    fn file_path(&self, index: usize) -> std::path::PathBuf {
        self.base_dir.join(format!("blocks-{index:04}.dat"))
    }

    fn current_file_index(&self) -> usize {
        self.files.len().saturating_sub(1)
    }

    fn ensure_room(&mut self, needed: usize) -> Result<()> {
        if self.files.is_empty() || self.cursor + needed > DATA_SIZE {
            self.start_new_file()?;
        }
        Ok(())
    }

    fn start_new_file(&mut self) -> Result<()> {
        let index = self.files.len();
        let path = self.file_path(index);
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CoreError::Io(e.to_string()))?;
        file.set_len(MAP_SIZE as u64)
            .map_err(|e| CoreError::Io(e.to_string()))?;
        let mmap = unsafe { memmap2::MmapMut::map_mut(&file) }.map_err(|e| CoreError::Io(e.to_string()))?;
        self.files.push(mmap);
        self.cursor = 0;
        Ok(())
    }

    fn recompute_checksum(&mut self, file_index: usize) {
        let file = &mut self.files[file_index];
        let crc = crc32fast::hash(&file[CHECKSUM_SIZE..]);
        file[..CHECKSUM_SIZE].copy_from_slice(&crc.to_le_bytes());
    }

    fn persist_index(&self) -> Result<()> {
        let mut writer = Writer::new();
        writer.write_varint(self.height_index.len() as u64);
        for (height, pos) in &self.height_index {
            writer.write_u64(*height);
            writer.write_u64(pos.file_index as u64);
            writer.write_u64(pos.offset as u64);
            writer.write_u64(pos.record_len as u64);
        }
        std::fs::write(self.base_dir.join("index.dat"), writer.into_bytes())
            .map_err(|e| CoreError::Io(e.to_string()))
    }

    fn load_index(&mut self, bytes: &[u8]) -> Result<()> {
        let mut reader = solidus_common::ser::Reader::new(bytes);
        let count = reader.read_varint()?;
        for _ in 0..count {
            let height = reader.read_u64()?;
            let file_index = reader.read_u64()? as usize;
            let offset = reader.read_u64()? as usize;
            let record_len = reader.read_u64()? as usize;
            let pos = Position {
                file_index,
                offset,
                record_len,
            };
            self.height_index.insert(height, pos);
            let block = self.read_at(pos)?;
            self.hash_index.insert(block.hash(), pos);
        }
        Ok(())
    }

    fn read_at(&self, pos: Position) -> Result<Block> {
        let file = &self.files[pos.file_index];
        let region_start = CHECKSUM_SIZE + pos.offset + LEN_PREFIX_SIZE;
        let region_end = region_start + pos.record_len;
        let mut reader = solidus_common::ser::Reader::new(&file[region_start..region_end]);
        let block = Block::read(&mut reader)?;
        reader.finish()?;
        Ok(block)
    }

    fn write_record(&mut self, block: &Block) -> Result<Position> {
        let mut writer = Writer::new();
        block.write(&mut writer);
        let body = writer.into_bytes();
        let record_len = body.len();
        self.ensure_room(LEN_PREFIX_SIZE + record_len)?;

        let file_index = self.current_file_index();
        let offset = self.cursor;
        let region_start = CHECKSUM_SIZE + offset;

        {
            let file = &mut self.files[file_index];
            file[region_start..region_start + LEN_PREFIX_SIZE]
                .copy_from_slice(&(record_len as u32).to_le_bytes());
            file[region_start + LEN_PREFIX_SIZE..region_start + LEN_PREFIX_SIZE + record_len]
                .copy_from_slice(&body);
        }
        self.recompute_checksum(file_index);
        self.files[file_index]
            .flush()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        self.cursor += LEN_PREFIX_SIZE + record_len;

        Ok(Position {
            file_index,
            offset,
            record_len,
        })
    }
}

fn open_mmap(path: &std::path::Path) -> Result<memmap2::MmapMut> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| CoreError::Io(e.to_string()))?;
    unsafe { memmap2::MmapMut::map_mut(&file) }.map_err(|e| CoreError::Io(e.to_string()))
}

fn verify_checksum(mmap: &memmap2::MmapMut) -> Result<()> {
    let stored = u32::from_le_bytes(mmap[..CHECKSUM_SIZE].try_into().expect("fixed size"));
    let actual = crc32fast::hash(&mmap[CHECKSUM_SIZE..]);
    if stored != actual {
        return Err(CoreError::ChecksumMismatch(
            "block file checksum does not match contents".into(),
        ));
    }
    Ok(())
}

impl BlockStorage for PersistentBlockStorage {
    fn load(&mut self, genesis: &Block) -> Result<()> {
        if self.height_index.is_empty() {
            self.save_block(genesis)?;
        }
        Ok(())
    }

    fn read_last(&self) -> Result<Option<Block>> {
        match self.height_index.values().next_back() {
            Some(pos) => Ok(Some(self.read_at(*pos)?)),
            None => Ok(None),
        }
    }

    fn read_by_height(&self, height: Height) -> Result<Option<Block>> {
        match self.height_index.get(&height) {
            Some(pos) => Ok(Some(self.read_at(*pos)?)),
            None => Ok(None),
        }
    }

    fn read_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        match self.hash_index.get(hash) {
            Some(pos) => Ok(Some(self.read_at(*pos)?)),
            None => Ok(None),
        }
    }

    fn save_block(&mut self, block: &Block) -> Result<()> {
        let expected = self.height_index.len() as Height;
        if block.header.height != expected {
            return Err(CoreError::HeightOrderViolation {
                expected,
                got: block.header.height,
            });
        }
        let pos = self.write_record(block)?;
        self.height_index.insert(block.header.height, pos);
        self.hash_index.insert(block.hash(), pos);
        self.persist_index()
    }

    fn update_block_sig(
        &mut self,
        height: Height,
        hash: &Hash,
        signature: Signature,
        validators: Vec<bool>,
    ) -> Result<()> {
        let pos = *self
            .height_index
            .get(&height)
            .ok_or_else(|| CoreError::BlockNotFound(format!("height {height}")))?;
        let existing = self.read_at(pos)?;
        if existing.hash() != *hash {
            return Err(CoreError::InconsistentIndex(
                "hash does not match block at that height".into(),
            ));
        }

        let mut writer = Writer::new();
        writer.write_bytes(&signature.to_bytes());
        writer.write_varint(validators.len() as u64);
        for bit in &validators {
            writer.write_u8(u8::from(*bit));
        }
        let patch = writer.into_bytes();

        let patch_start = CHECKSUM_SIZE + pos.offset + LEN_PREFIX_SIZE + SIGNATURE_FIELD_OFFSET;
        let file = &mut self.files[pos.file_index];
        if patch_start + patch.len() > CHECKSUM_SIZE + pos.offset + LEN_PREFIX_SIZE + pos.record_len {
            return Err(CoreError::InconsistentIndex(
                "signature patch would change the record's encoded length".into(),
            ));
        }
        file[patch_start..patch_start + patch.len()].copy_from_slice(&patch);
        self.recompute_checksum(pos.file_index);
        self.files[pos.file_index]
            .flush()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHeader;
    use crate::transaction::{Input, Lock, Output, OutputType, Transaction};
    use solidus_common::{Amount, Point, Scalar};

    fn block_at(height: Height) -> Block {
        let tx = Transaction {
            inputs: vec![Input::coinbase(height)],
            outputs: vec![Output {
                value: Amount::new(1),
                lock: Lock::key([height as u8; 32]),
                output_type: OutputType::Payment,
            }],
            payload: Vec::new(),
            lock_height: 0,
        };
        Block {
            header: BlockHeader {
                prev_block: Hash::init(),
                merkle_root: crate::block::merkle_root(std::slice::from_ref(&tx)),
                signature: Signature {
                    r: Point::identity(),
                    s: Scalar::zero(),
                },
                validators: vec![false, false],
                height,
                preimages: Vec::new(),
                enrollments: Vec::new(),
            },
            txs: vec![tx],
        }
    }

    #[test]
    fn memory_storage_round_trips_by_height_and_hash() {
        let mut storage = MemoryBlockStorage::new();
        let genesis = block_at(0);
        storage.load(&genesis).unwrap();
        let next = block_at(1);
        storage.save_block(&next).unwrap();

        assert_eq!(storage.read_by_height(1).unwrap().unwrap(), next);
        assert_eq!(storage.read_by_hash(&next.hash()).unwrap().unwrap(), next);
        assert_eq!(storage.read_last().unwrap().unwrap(), next);
    }

    #[test]
    fn memory_storage_rejects_out_of_order_height() {
        let mut storage = MemoryBlockStorage::new();
        let genesis = block_at(0);
        storage.load(&genesis).unwrap();
        let skipped = block_at(5);
        assert!(storage.save_block(&skipped).is_err());
    }

    #[test]
    fn memory_storage_update_sig_preserves_hash() {
        let mut storage = MemoryBlockStorage::new();
        let genesis = block_at(0);
        storage.load(&genesis).unwrap();
        let hash = genesis.hash();
        let new_sig = Signature {
            r: Point::identity(),
            s: Scalar::from_preimage(&Hash::digest(b"late signature")),
        };
        storage
            .update_block_sig(0, &hash, new_sig, vec![true, false])
            .unwrap();
        let updated = storage.read_by_height(0).unwrap().unwrap();
        assert_eq!(updated.header.signature, new_sig);
        assert_eq!(updated.hash(), hash);
    }

    #[test]
    fn persistent_storage_writes_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = block_at(0);
        let next = block_at(1);
        {
            let mut storage = PersistentBlockStorage::open(dir.path()).unwrap();
            storage.load(&genesis).unwrap();
            storage.save_block(&next).unwrap();
        }
        let storage = PersistentBlockStorage::open(dir.path()).unwrap();
        assert_eq!(storage.read_by_height(1).unwrap().unwrap(), next);
        assert_eq!(storage.read_by_hash(&next.hash()).unwrap().unwrap(), next);
    }

    #[test]
    fn persistent_storage_update_sig_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = block_at(0);
        let mut storage = PersistentBlockStorage::open(dir.path()).unwrap();
        storage.load(&genesis).unwrap();
        let hash = genesis.hash();
        let new_sig = Signature {
            r: Point::identity(),
            s: Scalar::from_preimage(&Hash::digest(b"late signature")),
        };
        storage
            .update_block_sig(0, &hash, new_sig, vec![true, false])
            .unwrap();
        let updated = storage.read_by_height(0).unwrap().unwrap();
        assert_eq!(updated.header.signature, new_sig);
        assert_eq!(updated.hash(), hash);
    }
}
