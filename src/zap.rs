use std::collections::{HashMap, HashSet};

use log::warn;

use crate::{byte_iter::ByteIter, dmu::DNodeBase, error::ZfsError, zio::Vdevs};

#[derive(Debug, PartialEq)]
#[repr(u64)]
enum ZapType {
    MicroZap = (1u64 << 63) + 3,
    FatZapHeader = (1u64 << 63) + 1,
    FatZapLeaf = (1u64 << 63) + 0,
}

impl ZapType {
    pub fn from_value(value: u64) -> Option<ZapType> {
        Some(if value == (1u64 << 63) + 3 {
            Self::MicroZap
        } else if value == (1u64 << 63) + 1 {
            Self::FatZapHeader
        } else if value == (1u64 << 63) + 0 {
            Self::FatZapLeaf
        } else {
            return None;
        })
    }
}

#[derive(Debug, PartialEq)]
#[repr(u8)]
pub enum ZapLeafChunkType {
    Entry = 252,
    Array = 251,
    Free = 253,
}

impl ZapLeafChunkType {
    pub fn from_value(value: u8) -> Option<ZapLeafChunkType> {
        Some(match value {
            252 => Self::Entry,
            251 => Self::Array,
            253 => Self::Free,
            _ => return None,
        })
    }
}

/// A decoded zap value, widened to the integer type `le_value_intlen`
/// declares. Scalars (`le_value_numints == 1`) unwrap to the bare integer
/// rather than a one-element array.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U8Array(Vec<u8>),
    U16(u16),
    U16Array(Vec<u16>),
    U32(u32),
    U32Array(Vec<u32>),
    U64(u64),
    U64Array(Vec<u64>),
}

/// End-of-chain sentinel for the leaf hash table and chunk `next` pointers.
/// Source: https://github.com/openzfs/zfs/blob/master/include/sys/zap_leaf.h
const CHAIN_END: u16 = 0xFFFF;

fn bytes_to_value(raw: &[u8], int_size: u8, numints: usize) -> Option<Value> {
    match int_size {
        1 => {
            let vals: Vec<u8> = raw.iter().copied().take(numints).collect();
            (vals.len() == numints).then(|| {
                if numints == 1 {
                    Value::U8(vals[0])
                } else {
                    Value::U8Array(vals)
                }
            })
        }
        2 => {
            let vals: Vec<u16> = raw
                .chunks_exact(2)
                .take(numints)
                .map(|c| u16::from_be_bytes(c.try_into().unwrap()))
                .collect();
            (vals.len() == numints).then(|| {
                if numints == 1 {
                    Value::U16(vals[0])
                } else {
                    Value::U16Array(vals)
                }
            })
        }
        4 => {
            let vals: Vec<u32> = raw
                .chunks_exact(4)
                .take(numints)
                .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
                .collect();
            (vals.len() == numints).then(|| {
                if numints == 1 {
                    Value::U32(vals[0])
                } else {
                    Value::U32Array(vals)
                }
            })
        }
        8 => {
            let vals: Vec<u64> = raw
                .chunks_exact(8)
                .take(numints)
                .map(|c| u64::from_be_bytes(c.try_into().unwrap()))
                .collect();
            (vals.len() == numints).then(|| {
                if numints == 1 {
                    Value::U64(vals[0])
                } else {
                    Value::U64Array(vals)
                }
            })
        }
        _ => None,
    }
}

#[derive(Debug)]
pub struct ZapLeaf {
    #[allow(dead_code)]
    header: ZapLeafHeader,
    hash_table: Vec<u16>,
    chunks: Vec<ZapLeafChunk>,
}

impl ZapLeaf {
    fn get_hash_table_numentries(block_size: usize) -> usize {
        // https://github.com/openzfs/zfs/blob/master/include/sys/zap_leaf.h#L77
        block_size / 32
    }

    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>, block_size: usize) -> Option<ZapLeaf> {
        let header = ZapLeafHeader::from_bytes_le(data)?;
        let mut hash_table = vec![0u16; Self::get_hash_table_numentries(block_size)];
        for value in hash_table.iter_mut() {
            *value = data.read_u16_le()?;
        }

        // Calculate length of chunk array
        // https://github.com/openzfs/zfs/blob/master/include/sys/zap_leaf.h#L45
        let remaining_bytes = block_size
            - ZapLeafHeader::get_ondisk_size()
            - Self::get_hash_table_numentries(block_size) * core::mem::size_of::<u16>();
        let nchunks = remaining_bytes / ZapLeafChunk::get_ondisk_size();
        let mut chunks = Vec::<ZapLeafChunk>::new();
        for _ in 0..nchunks {
            chunks.push(ZapLeafChunk::from_bytes_le(data)?);
        }

        Some(ZapLeaf {
            header,
            hash_table,
            chunks,
        })
    }

    fn read_chunk_chain(&self, mut idx: u16, total_bytes: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(total_bytes);
        while idx != CHAIN_END && out.len() < total_bytes {
            let Some(ZapLeafChunk::Array { array, next_chunk }) = self.chunks.get(idx as usize)
            else {
                break;
            };
            let remaining = total_bytes - out.len();
            out.extend(array.iter().take(remaining));
            idx = *next_chunk;
        }
        out
    }

    /// Walks every hash bucket's collision chain and decodes each entry.
    pub fn entries(&self) -> HashMap<String, Value> {
        let mut result = HashMap::new();
        for &head in self.hash_table.iter() {
            let mut idx = head;
            while idx != CHAIN_END {
                let Some(ZapLeafChunk::Entry {
                    int_size,
                    next_chunk,
                    name_chunk,
                    name_length,
                    value_chunk,
                    value_length,
                    ..
                }) = self.chunks.get(idx as usize)
                else {
                    break;
                };

                let name_bytes = self.read_chunk_chain(*name_chunk, *name_length as usize);
                let name_bytes = match name_bytes.iter().position(|&b| b == 0) {
                    Some(nul_pos) => &name_bytes[..nul_pos],
                    None => &name_bytes[..],
                };

                if let Ok(name) = String::from_utf8(name_bytes.to_vec()) {
                    let value_bytes = self.read_chunk_chain(
                        *value_chunk,
                        (*value_length as usize) * (*int_size as usize),
                    );
                    if let Some(value) =
                        bytes_to_value(&value_bytes, *int_size, *value_length as usize)
                    {
                        result.insert(name, value);
                    }
                }

                idx = *next_chunk;
            }
        }
        result
    }
}

#[derive(Debug)]
pub struct ZapLeafHeader {
    next_leaf: u64,
    prefix: u64,
    nfree: u16,
    nentries: u16,
    prefix_len: u16,
    freelist: u16,
}

impl ZapLeafHeader {
    pub fn get_ondisk_size() -> usize {
        48
    }

    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>) -> Option<ZapLeafHeader> {
        let zap_type = ZapType::from_value(data.read_u64_le()?)?;
        if zap_type != ZapType::FatZapLeaf {
            warn!("attempted to parse a zap structure as a leaf, it was not a leaf");
            return None;
        };
        let next_leaf = data.read_u64_le()?;
        let prefix = data.read_u64_le()?;
        let magic = data.read_u32_le()?;
        assert!(magic == 0x2AB1EAF);
        let nfree = data.read_u16_le()?;
        let nentries = data.read_u16_le()?;
        let prefix_len = data.read_u16_le()?;
        let freelist = data.read_u16_le()?;
        data.skip_n_bytes(12)?;
        Some(ZapLeafHeader {
            next_leaf,
            prefix,
            nfree,
            nentries,
            prefix_len,
            freelist,
        })
    }
}

#[derive(Debug)]
pub enum ZapLeafChunk {
    Entry {
        int_size: u8,
        next_chunk: u16,
        name_chunk: u16,
        name_length: u16,
        value_chunk: u16,
        value_length: u16,
        collision_differentiator: u16,
        hash: u64,
    },
    Array {
        array: Vec<u8>,
        next_chunk: u16,
    },
    Free {
        next_chunk: u16,
    },
}

impl ZapLeafChunk {
    pub fn get_ondisk_size() -> usize {
        // Source: https://github.com/openzfs/zfs/blob/master/include/sys/zap_leaf.h#L42
        24
    }

    pub fn get_byte_array_size() -> usize {
        // https://github.com/openzfs/zfs/blob/master/include/sys/zap_leaf.h#L62
        Self::get_ondisk_size() - 3
    }

    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>) -> Option<ZapLeafChunk> {
        let chunk_type = ZapLeafChunkType::from_value(data.read_u8()?)?;
        match chunk_type {
            ZapLeafChunkType::Entry => {
                let int_size = data.read_u8()?;
                let next_chunk = data.read_u16_le()?;
                let name_chunk = data.read_u16_le()?;
                let name_length = data.read_u16_le()?;
                let value_chunk = data.read_u16_le()?;
                let value_length = data.read_u16_le()?;
                let collision_differentiator = data.read_u16_le()?;
                data.skip_n_bytes(2)?; // padding
                let hash = data.read_u64_le()?;
                Some(ZapLeafChunk::Entry {
                    int_size,
                    next_chunk,
                    name_chunk,
                    name_length,
                    value_chunk,
                    value_length,
                    collision_differentiator,
                    hash,
                })
            }
            ZapLeafChunkType::Array => {
                let mut array = vec![0u8; Self::get_byte_array_size()];
                for byte in array.iter_mut() {
                    *byte = data.read_u8()?;
                }
                let next_chunk = data.read_u16_le()?;
                Some(ZapLeafChunk::Array { array, next_chunk })
            }
            ZapLeafChunkType::Free => {
                data.skip_n_bytes(Self::get_byte_array_size())?;
                let next_chunk = data.read_u16_le()?;
                Some(ZapLeafChunk::Free { next_chunk })
            }
        }
    }
}

#[derive(Debug)]
pub struct ZapPointerTable {
    block_id: u64,
    #[allow(dead_code)]
    num_blocks: u64,
    #[allow(dead_code)]
    shift: u64,
    #[allow(dead_code)]
    next_block: u64,
    #[allow(dead_code)]
    blocks_copied: u64,
}

impl ZapPointerTable {
    pub fn get_ondisk_size() -> usize {
        core::mem::size_of::<u64>() * 5
    }

    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>) -> Option<ZapPointerTable> {
        Some(ZapPointerTable {
            block_id: data.read_u64_le()?,
            num_blocks: data.read_u64_le()?,
            shift: data.read_u64_le()?,
            next_block: data.read_u64_le()?,
            blocks_copied: data.read_u64_le()?,
        })
    }
}

#[derive(Debug)]
pub struct FatZapHeader {
    #[allow(dead_code)]
    free_blocks: u64,
    #[allow(dead_code)]
    num_leafs: u64,
    #[allow(dead_code)]
    num_entries: u64,
    table: ZapPointerTable,
    embbeded_leafs_pointer_table: Vec<u64>,
}

impl FatZapHeader {
    pub fn from_bytes_le(
        data: &mut impl Iterator<Item = u8>,
        block_size: usize,
    ) -> Option<FatZapHeader> {
        let zap_magic = data.read_u64_le()?;
        assert!(zap_magic == 0x2F52AB2AB);
        let table = ZapPointerTable::from_bytes_le(data)?;
        let free_blocks = data.read_u64_le()?;
        let num_leafs = data.read_u64_le()?;
        let num_entries = data.read_u64_le()?;
        let _salt = data.read_u64_le()?;
        data.skip_n_bytes(
            block_size / 2 - (core::mem::size_of::<u64>() * 6 + ZapPointerTable::get_ondisk_size()),
        )?;
        let mut embbeded_leafs_pointer_table =
            vec![0u64; block_size / 2 / core::mem::size_of::<u64>()];
        for value in embbeded_leafs_pointer_table.iter_mut() {
            *value = data.read_u64_le()?;
        }

        Some(FatZapHeader {
            free_blocks,
            num_leafs,
            num_entries,
            table,
            embbeded_leafs_pointer_table,
        })
    }

    /// Returns `None` when the pointer table has spilled out of the header
    /// block (`zt_numblks != 0`); that layout is unsupported (see SPEC_FULL §4.7).
    pub fn read_hash_table_at(&self, index: usize) -> Option<u64> {
        if self.table.block_id == 0 {
            Some(self.embbeded_leafs_pointer_table[index])
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub enum ZapHeader {
    FatZap(FatZapHeader),
    MicroZap,
}

impl ZapHeader {
    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>, block_size: usize) -> Option<ZapHeader> {
        let zap_type = ZapType::from_value(data.read_u64_le()?)?;
        return match zap_type {
            ZapType::FatZapHeader => {
                FatZapHeader::from_bytes_le(data, block_size).map(ZapHeader::FatZap)
            }

            ZapType::MicroZap => {
                data.skip_n_bytes(128 - core::mem::size_of::<u64>())?;
                Some(Self::MicroZap)
            }

            ZapType::FatZapLeaf => None,
        };
    }

    pub fn unwrap_fat(self) -> FatZapHeader {
        match self {
            Self::FatZap(header) => header,
            _ => panic!("Expected to get a fat zap, got a micro zap!"),
        }
    }
}

// mzap_ent_phys_t { mze_value: u64, mze_cd: u32, mze_pad: u16, mze_name: [u8; 50] }
// Source: https://github.com/openzfs/zfs/blob/master/include/sys/zap_impl.h
const MICRO_ZAP_ENTRY_SIZE: usize = 64;
const MICRO_ZAP_HEADER_SIZE: usize = 64;
const MICRO_ZAP_NAME_OFFSET: usize = 14;

fn parse_micro_zap_entries(block: &[u8]) -> HashMap<String, Value> {
    let mut result = HashMap::new();
    let mut offset = MICRO_ZAP_HEADER_SIZE;
    while offset + MICRO_ZAP_ENTRY_SIZE <= block.len() {
        let entry = &block[offset..offset + MICRO_ZAP_ENTRY_SIZE];
        let value = u64::from_le_bytes(entry[0..8].try_into().unwrap());
        let name_bytes = &entry[MICRO_ZAP_NAME_OFFSET..];
        if name_bytes[0] != 0 {
            let end = name_bytes
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(name_bytes.len());
            if let Ok(name) = String::from_utf8(name_bytes[..end].to_vec()) {
                result.insert(name, Value::U64(value));
            }
        }
        offset += MICRO_ZAP_ENTRY_SIZE;
    }
    result
}

fn dump_fat_zap(
    header: &FatZapHeader,
    dnode: &mut DNodeBase,
    vdevs: &mut Vdevs,
    block_size: usize,
) -> Result<HashMap<String, Value>, ZfsError> {
    let mut seen = HashSet::new();
    let mut result = HashMap::new();
    for i in 0..header.embbeded_leafs_pointer_table.len() {
        let Some(block_id) = header.read_hash_table_at(i) else {
            return Err(ZfsError::Unsupported(
                "non-embedded fat zap pointer table".into(),
            ));
        };
        if !seen.insert(block_id) {
            continue;
        }
        let leaf_data = dnode.read_block(block_id as usize, vdevs).map_err(|_| {
            ZfsError::MalformedInput(format!("failed to read fat zap leaf block {block_id}"))
        })?;
        let leaf = ZapLeaf::from_bytes_le(&mut leaf_data.into_iter(), block_size).ok_or_else(|| {
            ZfsError::MalformedInput(format!("failed to parse fat zap leaf block {block_id}"))
        })?;
        result.extend(leaf.entries());
    }
    Ok(result)
}

/// Reads block 0 of `dnode`, dispatches on its zap-type tag, and returns the
/// fully decoded `name -> value` map (recursing through the leaf chain for a
/// fat zap, deduplicating against the full set of leaf block ids already
/// visited, not just consecutive repeats).
pub fn dump_zap_contents(
    dnode: &mut DNodeBase,
    vdevs: &mut Vdevs,
) -> Result<HashMap<String, Value>, ZfsError> {
    let block_size = dnode.parse_data_block_size();
    let block0 = dnode
        .read_block(0, vdevs)
        .map_err(|_| ZfsError::MalformedInput("failed to read zap block 0".into()))?;
    let header = ZapHeader::from_bytes_le(&mut block0.iter().copied(), block_size)
        .ok_or_else(|| ZfsError::MalformedInput("block is not a valid zap header".into()))?;

    match header {
        ZapHeader::MicroZap => Ok(parse_micro_zap_entries(&block0)),
        ZapHeader::FatZap(fat_header) => dump_fat_zap(&fat_header, dnode, vdevs, block_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_to_value_scalar_u64() {
        let raw = 0x0102030405060708u64.to_be_bytes();
        assert_eq!(bytes_to_value(&raw, 8, 1), Some(Value::U64(0x0102030405060708)));
    }

    #[test]
    fn bytes_to_value_array_u16() {
        let mut raw = Vec::new();
        raw.extend(1u16.to_be_bytes());
        raw.extend(2u16.to_be_bytes());
        assert_eq!(bytes_to_value(&raw, 2, 2), Some(Value::U16Array(vec![1, 2])));
    }

    #[test]
    fn bytes_to_value_unknown_width_is_none() {
        assert_eq!(bytes_to_value(&[0u8; 3], 3, 1), None);
    }

    #[test]
    fn micro_zap_skips_holes_and_reads_name() {
        let mut block = vec![0u8; MICRO_ZAP_HEADER_SIZE + MICRO_ZAP_ENTRY_SIZE * 2];
        // First entry is a hole (name[0] == 0); second holds value=42, name="tank".
        let second = MICRO_ZAP_HEADER_SIZE + MICRO_ZAP_ENTRY_SIZE;
        block[second..second + 8].copy_from_slice(&42u64.to_le_bytes());
        block[second + MICRO_ZAP_NAME_OFFSET..second + MICRO_ZAP_NAME_OFFSET + 4]
            .copy_from_slice(b"tank");
        let entries = parse_micro_zap_entries(&block);
        assert_eq!(entries.get("tank"), Some(&Value::U64(42)));
        assert_eq!(entries.len(), 1);
    }
}
