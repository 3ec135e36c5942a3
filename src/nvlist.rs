// Sources:
// https://github.com/nkchenz/zfspy/blob/master/zfspy/nvpair.py#L189
// https://cgit.freebsd.org/src/commit/?id=2d9cf57e18654edda53bcb460ca66641ba69ed75 (nvlist_check_features_for_read)
// https://medium.com/@tedsta/xdr-encoded-nvpairs-in-rust-aa56173f5e74
// https://github.com/openzfs/zfs/blob/master/module/nvpair/nvpair.c#L3608 (nvs_xdr_nvpair)
// https://github.com/openzfs/zfs/blob/master/module/nvpair/nvpair.c#L3200 (nvs_xdr_nvlist)
// https://github.com/openzfs/zfs/blob/master/module/nvpair/nvpair.c#L3291
// https://github.com/nkchenz/zfspy/blob/master/zfspy/nvpair.py#L137

use std::collections::HashMap;
use std::fmt::Debug;

use log::warn;

use crate::byte_iter::ByteIter;

pub type Name = String;

enum ValueType {
    Boolean = 1,
    Byte = 2, // char in c
    I16 = 3,
    U16 = 4,
    I32 = 5,
    U32 = 6,
    I64 = 7,
    U64 = 8,
    String = 9,
    ByteArray = 10, // char* in c
    I16Array = 11,
    U16Array = 12,
    I32Array = 13,
    U32Array = 14,
    I64Array = 15,
    U64Array = 16,
    StringArray = 17,
    HRTime = 18,
    NVList = 19,
    NVListArray = 20,
    BooleanValue = 21,
    I8 = 22,
    U8 = 23,
    BooleanArray = 24,
    I8Array = 25,
    U8Array = 26,
}

impl ValueType {
    pub fn from_value(val: u32) -> Option<ValueType> {
        Some(match val {
            1 => ValueType::Boolean,
            2 => ValueType::Byte,
            3 => ValueType::I16,
            4 => ValueType::U16,
            5 => ValueType::I32,
            6 => ValueType::U32,
            7 => ValueType::I64,
            8 => ValueType::U64,
            9 => ValueType::String,
            10 => ValueType::ByteArray,
            11 => ValueType::I16Array,
            12 => ValueType::U16Array,
            13 => ValueType::I32Array,
            14 => ValueType::U32Array,
            15 => ValueType::I64Array,
            16 => ValueType::U64Array,
            17 => ValueType::StringArray,
            18 => ValueType::HRTime,
            19 => ValueType::NVList,
            20 => ValueType::NVListArray,
            21 => ValueType::BooleanValue,
            22 => ValueType::I8,
            23 => ValueType::U8,
            24 => ValueType::BooleanArray,
            25 => ValueType::I8Array,
            26 => ValueType::U8Array,
            _ => return None,
        })
    }
}

#[derive(Debug)]
pub enum Value {
    Unknown,
    Boolean(bool),
    Byte(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    String(String),
    NVList(NVList),
    BooleanValue(bool),
    I8(i8),
    U8(u8),
    HRTime(i64),
    ByteArray(Vec<u8>),
    I8Array(Vec<i8>),
    U8Array(Vec<u8>),
    BooleanArray(Vec<bool>),
    I16Array(Vec<i16>),
    U16Array(Vec<u16>),
    I32Array(Vec<i32>),
    U32Array(Vec<u32>),
    I64Array(Vec<i64>),
    U64Array(Vec<u64>),
    StringArray(Vec<String>),
    NVListArray(Vec<NVList>),
}

impl TryInto<NVList> for Value {
    type Error = ();

    fn try_into(self) -> Result<NVList, Self::Error> {
        match self {
            Self::NVList(val) => Ok(val),
            _ => Err(()),
        }
    }
}

pub type NVList = HashMap<Name, Value>;

fn read_string_raw(data: &mut impl Iterator<Item = u8>, size: usize) -> Option<String> {
    let result: Vec<u8> = data.take(size).collect();
    if result.len() != size {
        return None;
    }
    String::from_utf8(result).ok()
}

// Returns: The string and the amount of bytes read including the bytes of the size
fn read_string_and_size(data: &mut impl Iterator<Item = u8>) -> Option<(String, usize)> {
    let result_size = data.read_u32_be()?;
    let result_size_aligned = if result_size % 4 == 0 {
        result_size
    } else {
        ((result_size / 4) + 1) * 4
    };
    let result = read_string_raw(data, result_size as usize);
    let padding_bytes = result_size_aligned - result_size;
    if padding_bytes > 0 {
        let _ = data.skip_n_bytes(padding_bytes as usize)?; // Consume the padding bytes
    }
    result.map(|res| (res, result_size_aligned as usize + 4))
}

/// Pads `raw_byte_count` up to the next multiple of 4 and consumes the
/// difference from `data`. XDR (RFC 4506) requires every opaque/fixed-size
/// array to be padded to a 4-byte boundary, including byte and array values.
fn skip_array_padding(data: &mut impl Iterator<Item = u8>, raw_byte_count: usize) -> Option<()> {
    let padded = raw_byte_count.div_ceil(4) * 4;
    data.skip_n_bytes(padded - raw_byte_count)
}

pub fn from_bytes_xdr(data: &mut impl Iterator<Item = u8>) -> Option<NVList> {
    // first byte is the encoding, second byte is the endianness, and the last two are reserved
    let xdr_encoding = data.next()?;
    let xdr_endian = data.next()?;
    let _ = data.skip_n_bytes(2); // Consume reserved bytes
    if xdr_endian != 1 || xdr_encoding != 1 {
        warn!("expected xdr encoding 1 and endian 1 (big-endian), found encoding {xdr_encoding}, endian {xdr_endian}");
        return None;
    }
    from_bytes(data, 0)
}

fn from_bytes(data: &mut impl Iterator<Item = u8>, recursion_depth: usize) -> Option<NVList> {
    if recursion_depth >= 128 {
        warn!("nvlist recursion limit of 128 reached, refusing to parse further");
        return None;
    }

    let mut nv_list: NVList = NVList::new();

    let _nvl_version = data.read_u32_be()?;
    let _nvl_flag = data.read_u32_be()?;

    // Parse pairs
    loop {
        let encode_size = data.read_u32_be()?;
        let decode_size = data.read_u32_be()?;
        if encode_size == 0 && decode_size == 0 {
            break;
        } // The nv_list has 8 bytes of zeroes at the end

        // decode_size = 4(for the size of the size itself) + 4(size of string) + size of string with padding + 4(size of value type) + 4(size of the number of values) + n(size of value(s))
        let (name, bytes_read) = read_string_and_size(data)?;

        let Some(value_type) = ValueType::from_value(data.read_u32_be()?) else {
            warn!("unknown nvlist value type with name \"{name}\", skipping entry ({decode_size} bytes)");
            let value_size = decode_size - (bytes_read as u32 + 4 /*size of decode_size*/ + 4 /*size of value_type*/);
            let _ = data.skip_n_bytes(value_size as usize)?; // Consume value bytes
            continue;
        };

        let nvalues = data.read_u32_be()?;

        if nvalues == 0 {
            if !nv_list.contains_key(&name) {
                nv_list.insert(name, Value::Unknown);
            } else {
                warn!("nvpair name \"{name}\" was repeated, keeping the first occurrence");
            }
            continue;
        }

        let is_repeat = nv_list.contains_key(&name);
        if is_repeat {
            warn!("nvpair name \"{name}\" was repeated, keeping the first occurrence");
        }

        let value = match value_type {
            ValueType::Boolean => Value::Boolean(data.read_u8()? != 0),
            ValueType::Byte => Value::Byte(data.read_u8()?),
            ValueType::I16 => Value::I16(data.read_i16_be()?),
            ValueType::U16 => Value::U16(data.read_u16_be()?),
            ValueType::I32 => Value::I32(data.read_i32_be()?),
            ValueType::U32 => Value::U32(data.read_u32_be()?),
            ValueType::I64 => Value::I64(data.read_i64_be()?),
            ValueType::U64 => Value::U64(data.read_u64_be()?),
            ValueType::String => Value::String(read_string_and_size(data)?.0),
            ValueType::HRTime => Value::HRTime(data.read_i64_be()?),
            ValueType::BooleanValue => Value::BooleanValue(data.read_u32_be()? != 0),
            ValueType::I8 => {
                let v = Value::I8(data.read_u8()? as i8);
                skip_array_padding(data, 1)?;
                v
            }
            ValueType::U8 => {
                let v = Value::U8(data.read_u8()?);
                skip_array_padding(data, 1)?;
                v
            }
            ValueType::NVList => Value::NVList(from_bytes(data, recursion_depth + 1)?),

            ValueType::ByteArray | ValueType::U8Array => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(data.read_u8()?);
                }
                skip_array_padding(data, n)?;
                Value::U8Array(arr)
            }
            ValueType::I8Array => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(data.read_u8()? as i8);
                }
                skip_array_padding(data, n)?;
                Value::I8Array(arr)
            }
            ValueType::BooleanArray => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(data.read_u32_be()? != 0);
                }
                Value::BooleanArray(arr)
            }
            ValueType::I16Array => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(data.read_i16_be()?);
                }
                skip_array_padding(data, n * 2)?;
                Value::I16Array(arr)
            }
            ValueType::U16Array => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(data.read_u16_be()?);
                }
                skip_array_padding(data, n * 2)?;
                Value::U16Array(arr)
            }
            ValueType::I32Array => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(data.read_i32_be()?);
                }
                Value::I32Array(arr)
            }
            ValueType::U32Array => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(data.read_u32_be()?);
                }
                Value::U32Array(arr)
            }
            ValueType::I64Array => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(data.read_i64_be()?);
                }
                Value::I64Array(arr)
            }
            ValueType::U64Array => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(data.read_u64_be()?);
                }
                Value::U64Array(arr)
            }
            ValueType::StringArray => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(read_string_and_size(data)?.0);
                }
                Value::StringArray(arr)
            }
            ValueType::NVListArray => {
                let n = nvalues as usize;
                let mut arr = Vec::with_capacity(n);
                for _ in 0..n {
                    arr.push(from_bytes(data, recursion_depth + 1)?);
                }
                Value::NVListArray(arr)
            }
        };
        if !is_repeat {
            nv_list.insert(name, value);
        }
    }
    Some(nv_list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_array_padding_rounds_up_to_four() {
        let mut stream = vec![0xAAu8, 0xBB, 0xCC, 1, 2, 3];
        // 3 raw bytes already consumed by caller; one padding byte remains.
        stream.drain(0..3);
        assert!(skip_array_padding(&mut stream.into_iter(), 3).is_some());
    }

    #[test]
    fn skip_array_padding_noop_when_already_aligned() {
        let mut stream: Vec<u8> = vec![9, 9, 9, 9];
        assert!(skip_array_padding(&mut stream.clone().into_iter(), 4).is_some());
        assert_eq!(stream.len(), 4);
    }
}
