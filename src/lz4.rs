use crate::byte_iter::ByteIter;

/// Maximum payload size this decompressor will ever allocate for, matching
/// the pool-wide cap on a single logical block.
pub const MAX_BLOCK_SIZE: usize = 8 * 1024 * 1024;

/// Decompresses a single ZFS-framed LZ4 stream (the compressed-size prefix is
/// handled by the caller; `data` is just the LZ4 token stream itself).
///
/// `output_size`, when given, is enforced exactly: decompression stops as
/// soon as the output reaches that many bytes, and it is an error to run out
/// of input before reaching it. This mirrors the real decoder, which always
/// knows the expected logical size up front from the owning block pointer.
pub fn lz4_decompress_blocks(
    data: &mut impl Iterator<Item = u8>,
    output_size: Option<usize>,
) -> Result<Vec<u8>, ()> {
    if let Some(size) = output_size {
        if size > MAX_BLOCK_SIZE {
            return Err(());
        }
    }

    let mut output_buf = Vec::new();
    loop {
        if let Some(size) = output_size {
            if output_buf.len() >= size {
                break;
            }
        }

        let Some(token) = data.next() else {
            break;
        };
        let mut literal_size: usize = (token & 0xF0) >> 4;
        let mut lookback_size: usize = token & 0x0F;

        if literal_size == 0xF {
            loop {
                let extended_size: usize = data.next().ok_or(())?.into();
                literal_size += extended_size;
                if extended_size != 0xFF {
                    break;
                }
            }
        }

        for _ in 0..literal_size {
            output_buf.push(data.next().ok_or(())?);
        }

        if let Some(size) = output_size {
            if output_buf.len() >= size {
                output_buf.truncate(size);
                break;
            }
        }

        let Ok(lookback) = data.read_u16_le().ok_or(()) else {
            if lookback_size == 0 {
                break;
            } else {
                return Err(());
            }
        };

        if lookback as usize > output_buf.len() || lookback == 0 {
            return Err(());
        }

        if lookback_size == 0xF {
            loop {
                let extended_size: usize = data.next().ok_or(())?.into();
                lookback_size += extended_size;
                if extended_size != 0xFF {
                    break;
                }
            }
        }

        lookback_size += 4;

        let mut lookback_pos = output_buf.len() - usize::from(lookback);
        for _ in 0..lookback_size {
            output_buf.push(output_buf[lookback_pos]);
            lookback_pos += 1;
        }
    }

    if let Some(size) = output_size {
        if output_buf.len() != size {
            return Err(());
        }
    }

    Ok(output_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_only_block_round_trips() {
        // token: literal_size=4, lookback_size=0, then 4 literal bytes, then
        // stream ends (no lookback pair to read).
        let stream = [0x40u8, b'z', b'f', b's', b'!'];
        let result = lz4_decompress_blocks(&mut stream.into_iter(), Some(4)).unwrap();
        assert_eq!(result, b"zfs!");
    }

    #[test]
    fn mismatched_output_size_errors() {
        let stream = [0x40u8, b'z', b'f', b's', b'!'];
        assert!(lz4_decompress_blocks(&mut stream.into_iter(), Some(5)).is_err());
    }

    #[test]
    fn oversize_request_rejected() {
        let stream: [u8; 0] = [];
        assert!(lz4_decompress_blocks(&mut stream.into_iter(), Some(MAX_BLOCK_SIZE + 1)).is_err());
    }

    #[test]
    fn lookback_repeats_earlier_bytes() {
        // literal "ab", then a lookback of 2 bytes repeated min-length (4) times.
        // token: literal_size=2, lookback_size=0 -> extended to 4 total copies.
        let mut stream = vec![0x20u8, b'a', b'b'];
        stream.extend(2u16.to_le_bytes()); // lookback = 2
        let result = lz4_decompress_blocks(&mut stream.into_iter(), Some(6)).unwrap();
        assert_eq!(result, b"ababab");
    }
}
