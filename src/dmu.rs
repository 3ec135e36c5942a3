use crate::{
    byte_iter::ByteIter,
    dsl,
    error::ZfsError,
    zap,
    zil::ZilHeader,
    zio::{self, BlockPointer, ChecksumMethod, CompressionMethod, Vdevs},
};
use log::warn;
use std::collections::HashMap;
use std::fmt::Debug;

#[derive(Debug, PartialEq, Eq)]
pub enum ObjType {
    None = 0,
    ObjectDirectory = 1,
    ObjectArray = 2,
    PackedNVList = 3,
    PackedNVListSize = 4,
    BlockPointerList = 5,
    BlockPointerListHeader = 6,
    SpaceMapHeader = 7,
    SpaceMap = 8,
    IntentLog = 9,
    DNode = 10,
    ObjSet = 11,
    DSLDataset = 12,
    DSLDatasetChildMap = 13,
    ObjSetSnapshotMap = 14,
    DSLProperties = 15,
    DSLObjSet = 16,
    ZNode = 17,
    AcessControlList = 18,
    PlainFileContents = 19,
    DirectoryContents = 20,
    MasterNode = 21,
    DeleteQueue = 22,
    ZVol = 23,
    ZVolProperties = 24,
    // Source: https://github.com/openzfs/zfs/blob/master/module/zfs/sa.c (sa_setup order)
    SAMasterNode = 44,
    SAAttrRegistration = 45,
    SAAttrLayouts = 46,
}

impl ObjType {
    pub fn from_value(value: usize) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::ObjectDirectory,
            2 => Self::ObjectArray,
            3 => Self::PackedNVList,
            4 => Self::PackedNVListSize,
            5 => Self::BlockPointerList,
            6 => Self::BlockPointerListHeader,
            7 => Self::SpaceMapHeader,
            8 => Self::SpaceMap,
            9 => Self::IntentLog,
            10 => Self::DNode,
            11 => Self::ObjSet,
            12 => Self::DSLDataset,
            13 => Self::DSLDatasetChildMap,
            14 => Self::ObjSetSnapshotMap,
            15 => Self::DSLProperties,
            16 => Self::DSLObjSet,
            17 => Self::ZNode,
            18 => Self::AcessControlList,
            19 => Self::PlainFileContents,
            20 => Self::DirectoryContents,
            21 => Self::MasterNode,
            22 => Self::DeleteQueue,
            23 => Self::ZVol,
            24 => Self::ZVolProperties,
            44 => Self::SAMasterNode,
            45 => Self::SAAttrRegistration,
            46 => Self::SAAttrLayouts,
            _ => return None,
        })
    }
}

/// Mirrors the on-disk "big dnode" remap heuristic used by newer zpool
/// versions: a `dn_type` above the legacy table's range folds onto one of a
/// small handful of extra indices via its low 5 bits. This crate's own
/// `ObjType` table never produces a value in that range, so nothing in this
/// module calls this helper; it is kept standalone and tested in isolation so
/// the behavior stays discoverable if a future type table needs it.
pub fn remap_dn_type(dn_type: u8) -> u8 {
    if dn_type > 54 {
        if dn_type & 0b1_1111 == 3 {
            26
        } else if dn_type & 0b1_1111 == 4 {
            27
        } else {
            dn_type
        }
    } else {
        dn_type
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum BonusType {
    None = 0,
    PackedNVListSize = 4,
    SpaceMapHeader = 7,
    DSLDirectory = 12,
    DSLDataset = 16,
    ZNode = 17,
}

impl BonusType {
    pub fn from_value(value: usize) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            4 => Self::PackedNVListSize,
            7 => Self::SpaceMapHeader,
            12 => Self::DSLDirectory,
            16 => Self::DSLDataset,
            17 => Self::ZNode,
            _ => return None,
        })
    }
}

mod dnode_flag {
    pub const USED_AMOUNT_IS_IN_BYTES: u8 = 1 << 0;
    pub const HAS_SPILL_BLKPTR: u8 = 1 << 2;
}

// General dnode data, not specific to any type of dnode
pub struct DNodeBase {
    indirect_blocksize_log2: u8,
    n_indirect_levels: u8,
    checksum_method: zio::ChecksumMethod,
    compression_method: zio::CompressionMethod,
    data_blocksize_in_sectors: u16,
    num_slots: u8, // A big dnode may take up multiple dnode "slots", a dnode slot is 512 bytes
    max_indirect_block_id: u64,
    total_allocated: u64,
    total_allocated_is_in_bytes: bool, // if false then it is in sectors
    block_pointers: Vec<zio::BlockPointer>,
    bonus_data: Vec<u8>,
}

impl Debug for DNodeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DNodeBase")
            .field("indirect_blocksize", &self.parse_indirect_block_size())
            .field("n_indirect_levels", &self.n_indirect_levels)
            .field("checksum_method", &self.checksum_method)
            .field("compression_method", &self.compression_method)
            .field("data_blocksize", &self.parse_data_block_size())
            .field("num_slots", &self.num_slots)
            .field("max_indirect_block_id", &self.max_indirect_block_id)
            .field("total_allocated", &self.total_allocated)
            .field("total_allocated_is_in_bytes", &self.total_allocated_is_in_bytes)
            .field("block_pointers", &self.block_pointers)
            .field("bonus_data", &self.bonus_data)
            .finish()
    }
}

#[derive(Debug)]
struct IndirectBlockTag {
    id: usize, // Which number is the block if you were to sequentially lay out all the blocks at this level
    offset: usize, // At what index in the block can you find the pointer to the next level
}

impl DNodeBase {
    pub fn get_ondisk_size(&self) -> usize {
        usize::from(self.num_slots) * 512
    }

    pub fn get_n_slots_from_bytes_le(mut data: impl Iterator<Item = u8>) -> Option<usize> {
        data.skip_n_bytes(12)?;
        let extra_slots = data.next()?;
        Some(usize::from(extra_slots) + 1)
    }

    pub fn get_bonus_data(&self) -> &[u8] {
        &self.bonus_data
    }

    // Note: This will always read a multiple of 512 bytes as all dnodes have a size that is a multiple of 512 which was
    // the old size of one "slot", however newer implementations allow dnodes to take up multiple slots so therefore a multiple of 512.
    // Source: https://github.com/openzfs/zfs/blob/master/include/sys/dnode.h#L188
    pub fn from_bytes_le<Iter>(data: &mut Iter) -> Option<(DNodeBase, ObjType, BonusType)>
    where
        Iter: Iterator<Item = u8> + Clone,
    {
        let dnode_type = ObjType::from_value(data.next()?.into())?;
        let indirect_blocksize_log2 = data.next()?;
        let n_indirect_levels = data.next()?;
        let n_block_pointers = data.next()?;
        let bonus_data_type = BonusType::from_value(data.next()?.into())?;
        let checksum_method = ChecksumMethod::from_value(data.next()?.into())?;
        let compression_method = CompressionMethod::from_value(data.next()?.into())?;
        let flags = data.next()?; // dn_flags
        let data_blocksize_in_sectors = data.read_u16_le()?;
        let bonus_data_len = data.read_u16_le()?;
        let extra_slots = data.next()?;
        data.skip_n_bytes(3)?; // Ignore 3 padding bytes
                                // We have read 16 bytes up until now

        let max_indirect_block_id = data.read_u64_le()?;
        let total_allocated = data.read_u64_le()?; /* bytes (or sectors, depending on a flag) of disk space */
        data.skip_n_bytes(4 * core::mem::size_of::<u64>())?; // Ignore 4 u64 paddings

        if flags & dnode_flag::HAS_SPILL_BLKPTR != 0 {
            warn!("dnode has a spill block pointer, which this crate does not decode; skipping");
            return None;
        }

        // Currently there must be at least one block pointer and at most 3
        if !(n_block_pointers >= 1 && n_block_pointers <= 3) {
            warn!(
                "tried to parse a dnode with {} block pointers, sanity check failed",
                n_block_pointers
            );
            return None;
        }

        // So far we have read 64 bytes, this is where the tail starts
        // The tail contains the variably sized data like the blkptrs, the bonus_data
        // and the padding needed to reach a multiple of 512 bytes

        // Read n_block_pointers block pointers
        let mut block_pointers = Vec::new();
        for _ in 0..n_block_pointers {
            // NOTE: We try to read the block pointers even if we are not going to need them
            // This means that we sometimes try to parse "unallocated" block pointers that might be all zeros
            // but because we check the checksum and the endianness this will fail so it's fine
            if let Some(bp) = zio::BlockPointer::from_bytes_le(&mut data.clone()) {
                block_pointers.push(bp);
            }
            data.skip_n_bytes(zio::BlockPointer::get_ondisk_size())?;
        }

        let mut bonus_data = Vec::new();

        // Read bonus_data
        for _ in 0..bonus_data_len {
            bonus_data.push(data.next()?);
        }

        // Read remaining padding until the next multiple of 512 bytes
        let total_size: usize =
            64 + usize::from(n_block_pointers) * zio::BlockPointer::get_ondisk_size() + usize::from(bonus_data_len);
        // Round up the size to the next multiple of 512 bytes
        let rounded_up_total_size = if total_size % 512 == 0 {
            total_size
        } else {
            ((total_size / 512) + 1) * 512
        };

        // Sanity check that the size of the dnode calculated using the n_block_pointers and bonus_data_len is the same as the one calculated form the number of slots this dnode takes up
        assert!(rounded_up_total_size == (usize::from(extra_slots) + 1) * 512);

        let tail_padding_size = rounded_up_total_size - total_size;
        data.skip_n_bytes(tail_padding_size)?;

        Some((
            DNodeBase {
                indirect_blocksize_log2,
                n_indirect_levels,
                checksum_method,
                compression_method,
                data_blocksize_in_sectors,
                num_slots: extra_slots + 1,
                max_indirect_block_id,
                total_allocated,
                total_allocated_is_in_bytes: (flags & dnode_flag::USED_AMOUNT_IS_IN_BYTES) != 0,
                block_pointers,
                bonus_data,
            },
            dnode_type,
            bonus_data_type,
        ))
    }

    pub fn parse_data_block_size(&self) -> usize {
        usize::from(self.data_blocksize_in_sectors) * 512
    }

    pub fn parse_indirect_block_size(&self) -> usize {
        2usize.pow(u32::from(self.indirect_blocksize_log2))
    }

    fn next_level_id_and_offset(&self, current_level_id: usize) -> IndirectBlockTag {
        let blocks_per_indirect_block = self.parse_indirect_block_size() / BlockPointer::get_ondisk_size();
        IndirectBlockTag {
            id: current_level_id / blocks_per_indirect_block,
            offset: current_level_id % blocks_per_indirect_block,
        }
    }

    pub fn get_data_size(&self) -> usize {
        usize::try_from(self.max_indirect_block_id + 1).unwrap() * self.parse_data_block_size()
    }

    pub fn read_block(&mut self, block_id: usize, vdevs: &mut zio::Vdevs) -> Result<Vec<u8>, ()> {
        if block_id > self.max_indirect_block_id.try_into().unwrap() {
            return Err(());
        }
        assert!(self.n_indirect_levels >= 1);

        if self.n_indirect_levels == 1 {
            // There is no indirection
            return self.block_pointers[block_id].dereference(vdevs).map_err(|_| ());
        }

        // If we got here then n_indirect_levels must be 2 or greater

        let mut levels: Vec<IndirectBlockTag> = Vec::new();
        levels.push(self.next_level_id_and_offset(block_id));
        for _ in 1..self.n_indirect_levels - 1 {
            levels.push(self.next_level_id_and_offset(levels.last().unwrap().id));
        }

        // Travel back down the levels
        let top_level = levels.pop().unwrap();
        let mut indirect_block_data = self.block_pointers[top_level.id]
            .dereference(vdevs)
            .map_err(|_| ())?;
        let mut next_block_pointer = {
            let mut iter = indirect_block_data.iter().copied();
            iter.skip_n_bytes(BlockPointer::get_ondisk_size() * top_level.offset);
            BlockPointer::from_bytes_le(&mut iter).ok_or(())?
        };

        for _ in 1..self.n_indirect_levels - 1 {
            indirect_block_data = next_block_pointer.dereference(vdevs).map_err(|_| ())?;
            let cur_level = levels.pop().unwrap();
            next_block_pointer = {
                let mut iter = indirect_block_data.iter().copied();
                iter.skip_n_bytes(BlockPointer::get_ondisk_size() * cur_level.offset);
                BlockPointer::from_bytes_le(&mut iter).ok_or(())?
            };
        }

        let block_data = next_block_pointer.dereference(vdevs).map_err(|_| ())?;
        assert!(block_data.len() == self.parse_data_block_size());
        Ok(block_data)
    }

    // Note: Reading 0 bytes will *always* succeed
    pub fn read(&mut self, offset: usize, size: usize, vdevs: &mut zio::Vdevs) -> Result<Vec<u8>, ()> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut result: Vec<u8> = Vec::new();
        let first_data_block_id = offset / self.parse_data_block_size();
        let first_data_block_offset = offset % self.parse_data_block_size();
        let first_data_block = self.read_block(first_data_block_id, vdevs)?;
        result.extend(first_data_block.iter().skip(first_data_block_offset));

        if result.len() >= size {
            result.resize(size, 0);
            return Ok(result);
        }

        let size_remaining = size - result.len();
        let blocks_to_read = if size_remaining % self.parse_data_block_size() == 0 {
            size_remaining / self.parse_data_block_size()
        } else {
            (size_remaining / self.parse_data_block_size()) + 1
        };
        for i in 1..=blocks_to_read {
            result.extend(self.read_block(first_data_block_id + i, vdevs)?);
        }

        result.resize(size, 0);
        assert!(result.len() == size);
        Ok(result)
    }
}

#[derive(Debug)]
pub struct DNodeObjectDirectory(pub DNodeBase);

impl DNodeObjectDirectory {
    pub fn dump_zap_contents(
        &mut self,
        vdevs: &mut Vdevs,
    ) -> Result<HashMap<String, zap::Value>, ZfsError> {
        zap::dump_zap_contents(&mut self.0, vdevs)
    }
}

#[derive(Debug)]
pub struct DNodeMasterNode(pub DNodeBase);

impl DNodeMasterNode {
    pub fn dump_zap_contents(
        &mut self,
        vdevs: &mut Vdevs,
    ) -> Result<HashMap<String, zap::Value>, ZfsError> {
        zap::dump_zap_contents(&mut self.0, vdevs)
    }
}

/// The ZPL directory zap: keys are filenames, values pack
/// `file_type = value >> 60` and `obj_id = value & ((1 << 48) - 1)`.
#[derive(Debug)]
pub struct DNodeDirectoryContents(pub DNodeBase);

impl DNodeDirectoryContents {
    pub fn dump_zap_contents(
        &mut self,
        vdevs: &mut Vdevs,
    ) -> Result<HashMap<String, zap::Value>, ZfsError> {
        zap::dump_zap_contents(&mut self.0, vdevs)
    }
}

#[derive(Debug)]
pub struct DNodeDeleteQueue(pub DNodeBase);

impl DNodeDeleteQueue {
    pub fn dump_zap_contents(
        &mut self,
        vdevs: &mut Vdevs,
    ) -> Result<HashMap<String, zap::Value>, ZfsError> {
        zap::dump_zap_contents(&mut self.0, vdevs)
    }
}

/// A regular file's dnode; its data blocks hold the file's byte stream and
/// its bonus buffer (when SA-enabled) holds the packed system attributes.
#[derive(Debug)]
pub struct DNodePlainFileContents(pub DNodeBase);

#[derive(Debug)]
pub struct DNodeSAMasterNode(pub DNodeBase);

impl DNodeSAMasterNode {
    pub fn dump_zap_contents(
        &mut self,
        vdevs: &mut Vdevs,
    ) -> Result<HashMap<String, zap::Value>, ZfsError> {
        zap::dump_zap_contents(&mut self.0, vdevs)
    }
}

#[derive(Debug)]
pub struct DNodeSAAttrLayouts(pub DNodeBase);

impl DNodeSAAttrLayouts {
    pub fn dump_zap_contents(
        &mut self,
        vdevs: &mut Vdevs,
    ) -> Result<HashMap<String, zap::Value>, ZfsError> {
        zap::dump_zap_contents(&mut self.0, vdevs)
    }
}

#[derive(Debug)]
pub struct DNodeSAAttrRegistration(pub DNodeBase);

impl DNodeSAAttrRegistration {
    pub fn dump_zap_contents(
        &mut self,
        vdevs: &mut Vdevs,
    ) -> Result<HashMap<String, zap::Value>, ZfsError> {
        zap::dump_zap_contents(&mut self.0, vdevs)
    }
}

pub struct DNodeDSLDirectory(pub DNodeBase);

impl Debug for DNodeDSLDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // NOTE: Since this type of dnode does not contain data, showing info about the block
        // pointers, data block size, and the allocated size is useless, so we don't do it
        f.debug_struct("DNodeDSLDirectory")
            .field("checksum_method", &self.0.checksum_method)
            .field("compression_method", &self.0.compression_method)
            .field("num_slots", &self.0.num_slots)
            .field("bonus", &self.parse_bonus_data())
            .finish()
    }
}

impl DNodeDSLDirectory {
    pub fn parse_bonus_data(&self) -> Option<dsl::DSLDirectoryData> {
        dsl::DSLDirectoryData::from_bytes_le(&mut self.0.bonus_data.iter().copied())
    }
}

pub struct DNodeDSLDataset(pub DNodeBase);

impl Debug for DNodeDSLDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DNodeDSLDataset")
            .field("checksum_method", &self.0.checksum_method)
            .field("compression_method", &self.0.compression_method)
            .field("num_slots", &self.0.num_slots)
            .field("bonus", &self.parse_bonus_data())
            .finish()
    }
}

impl DNodeDSLDataset {
    pub fn parse_bonus_data(&self) -> Option<dsl::DSLDatasetData> {
        dsl::DSLDatasetData::from_bytes_le(&mut self.0.bonus_data.iter().copied())
    }
}

/// `bpobj_phys_t` header fields, read directly from the bonus buffer.
/// Source: https://github.com/openzfs/zfs/blob/master/include/sys/bpobj.h
#[derive(Debug)]
pub struct BpobjHeader {
    pub object_count: u64,
    pub bytes: u64,
    pub comp: u64,
    pub uncomp: u64,
}

pub struct DNodeBpobj(pub DNodeBase);

impl Debug for DNodeBpobj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DNodeBpobj")
            .field("header", &self.parse_header())
            .finish()
    }
}

impl DNodeBpobj {
    pub fn parse_header(&self) -> Option<BpobjHeader> {
        let mut data = self.0.bonus_data.iter().copied();
        Some(BpobjHeader {
            object_count: data.read_u64_le()?,
            bytes: data.read_u64_le()?,
            comp: data.read_u64_le()?,
            uncomp: data.read_u64_le()?,
        })
    }
}

#[derive(Debug)]
pub enum DNode {
    ObjectDirectory(DNodeObjectDirectory),
    DSLDirectory(DNodeDSLDirectory),
    DSLDataset(DNodeDSLDataset),
    MasterNode(DNodeMasterNode),
    DirectoryContents(DNodeDirectoryContents),
    DeleteQueue(DNodeDeleteQueue),
    PlainFileContents(DNodePlainFileContents),
    Bpobj(DNodeBpobj),
    SystemAttributesMasterNode(DNodeSAMasterNode),
    SystemAttributesLayouts(DNodeSAAttrLayouts),
    SystemAttributesRegistrations(DNodeSAAttrRegistration),
    /// Carries the raw, structurally-parsed dnode for any `(dn_type,
    /// bonus_type)` combination this crate does not model a dedicated
    /// dumper for, so `--raw` inspection and traversal can still proceed.
    Unsupported(DNodeBase),
}

impl DNode {
    pub fn from_bytes_le<Iter>(data: &mut Iter) -> Option<DNode>
    where
        Iter: Iterator<Item = u8> + Clone,
    {
        let (dnode_base, dnode_type, bonus_data_type) = DNodeBase::from_bytes_le(data)?;
        Some(match dnode_type {
            ObjType::ObjectDirectory => DNode::ObjectDirectory(DNodeObjectDirectory(dnode_base)),
            ObjType::BlockPointerList => DNode::Bpobj(DNodeBpobj(dnode_base)),
            ObjType::DSLDataset => match bonus_data_type {
                BonusType::DSLDirectory => DNode::DSLDirectory(DNodeDSLDirectory(dnode_base)),
                _ => DNode::Unsupported(dnode_base),
            },
            ObjType::DSLObjSet => match bonus_data_type {
                BonusType::DSLDataset => DNode::DSLDataset(DNodeDSLDataset(dnode_base)),
                _ => DNode::Unsupported(dnode_base),
            },
            ObjType::PlainFileContents => DNode::PlainFileContents(DNodePlainFileContents(dnode_base)),
            ObjType::DirectoryContents => DNode::DirectoryContents(DNodeDirectoryContents(dnode_base)),
            ObjType::MasterNode => DNode::MasterNode(DNodeMasterNode(dnode_base)),
            ObjType::DeleteQueue => DNode::DeleteQueue(DNodeDeleteQueue(dnode_base)),
            ObjType::SAMasterNode => DNode::SystemAttributesMasterNode(DNodeSAMasterNode(dnode_base)),
            ObjType::SAAttrLayouts => DNode::SystemAttributesLayouts(DNodeSAAttrLayouts(dnode_base)),
            ObjType::SAAttrRegistration => {
                DNode::SystemAttributesRegistrations(DNodeSAAttrRegistration(dnode_base))
            }
            ObjType::None
            | ObjType::ObjectArray
            | ObjType::PackedNVList
            | ObjType::PackedNVListSize
            | ObjType::BlockPointerListHeader
            | ObjType::SpaceMapHeader
            | ObjType::SpaceMap
            | ObjType::IntentLog
            | ObjType::DNode
            | ObjType::ObjSet
            | ObjType::DSLDatasetChildMap
            | ObjType::ObjSetSnapshotMap
            | ObjType::DSLProperties
            | ObjType::ZNode
            | ObjType::AcessControlList
            | ObjType::ZVol
            | ObjType::ZVolProperties => DNode::Unsupported(dnode_base),
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ObjSetType {
    None = 0,
    Meta = 1,
    Zfs = 2,
    Zvol = 3,
}

impl ObjSetType {
    pub fn from_value(value: usize) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::Meta,
            2 => Self::Zfs,
            3 => Self::Zvol,
            _ => return None,
        })
    }
}

#[derive(Debug)]
pub struct ObjSet {
    metadnode: DNodeBase,
    zil: Option<ZilHeader>,
    typ: ObjSetType,
}

impl ObjSet {
    pub fn from_bytes_le<Iter>(data: &mut Iter) -> Option<ObjSet>
    where
        Iter: Iterator<Item = u8> + Clone,
    {
        let (metadnode, metadnode_type, _) = DNodeBase::from_bytes_le(data)?;
        if metadnode_type != ObjType::DNode {
            warn!(
                "tried to open objset with metadnode of type {:?}, sanity check failed",
                metadnode_type
            );
            return None;
        }

        let zil = ZilHeader::from_bytes_le(&mut data.clone());
        data.skip_n_bytes(ZilHeader::get_ondisk_size());

        let typ = ObjSetType::from_value(data.read_u64_le()?.try_into().ok()?)?;
        // Consume padding up to 1k
        let size = metadnode.get_ondisk_size() + ZilHeader::get_ondisk_size() + core::mem::size_of::<u64>();
        let remaining = 1024 - size;
        data.skip_n_bytes(remaining)?;
        Some(ObjSet { metadnode, zil, typ })
    }

    pub fn zil(&self) -> Option<&ZilHeader> {
        self.zil.as_ref()
    }

    pub fn typ(&self) -> &ObjSetType {
        &self.typ
    }

    /// Upper bound on object ids allocated in this object set (the metadnode's
    /// own data size divided by the 512-byte dnode slot size). Some of these
    /// ids may be holes; callers enumerating objects should skip ones that
    /// fail to decode.
    pub fn object_count(&self) -> usize {
        self.metadnode.get_data_size() / 512
    }

    pub fn get_dnode_at(&mut self, index: usize, vdevs: &mut Vdevs) -> Option<DNode> {
        let mut data = self.metadnode.read(index * 512, 512, vdevs).ok()?;
        let dnode_slots = DNodeBase::get_n_slots_from_bytes_le(data.iter().copied())?;
        data.extend(
            self.metadnode
                .read((index + 1) * 512, (dnode_slots - 1) * 512, vdevs)
                .ok()?
                .iter(),
        );
        DNode::from_bytes_le(&mut data.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_dn_type_is_identity_in_legacy_range() {
        assert_eq!(remap_dn_type(24), 24);
        assert_eq!(remap_dn_type(54), 54);
    }

    #[test]
    fn remap_dn_type_folds_big_dnode_range() {
        // 67 & 0x1f == 3, 68 & 0x1f == 4; both are above the legacy cutoff of 54.
        assert_eq!(remap_dn_type(67), 26);
        assert_eq!(remap_dn_type(68), 27);
    }

    #[test]
    fn remap_dn_type_passes_through_unmapped_big_dnode_values() {
        // 70 & 0x1f == 6, which has no remap entry, so it stays unchanged.
        assert_eq!(remap_dn_type(70), 70);
    }
}
