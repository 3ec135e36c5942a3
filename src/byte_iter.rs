pub trait ByteIter {
    fn read_u8(&mut self) -> Option<u8>;
    fn read_i16_be(&mut self) -> Option<i16>;
    fn read_i16_le(&mut self) -> Option<i16>;
    fn read_i32_be(&mut self) -> Option<i32>;
    fn read_i32_le(&mut self) -> Option<i32>;
    fn read_i64_be(&mut self) -> Option<i64>;
    fn read_i64_le(&mut self) -> Option<i64>;

    fn read_u16_be(&mut self) -> Option<u16>;
    fn read_u16_le(&mut self) -> Option<u16>;
    fn read_u32_be(&mut self) -> Option<u32>;
    fn read_u32_le(&mut self) -> Option<u32>;
    fn read_u64_be(&mut self) -> Option<u64>;
    fn read_u64_le(&mut self) -> Option<u64>;

    #[must_use]
    fn skip_n_bytes(&mut self, n_bytes: usize) -> Option<()>;
}

impl<T> ByteIter for T
where
    T: Iterator<Item = u8>,
{
    fn skip_n_bytes(&mut self, n_bytes: usize) -> Option<()> {
        if n_bytes > 0 {
            self.nth(n_bytes-1)?;
        }    
        Some(())
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.next()
    }

    fn read_i16_be(&mut self) -> Option<i16> {
        Some(i16::from_be_bytes([self.next()?, self.next()?]))
    }

    fn read_u16_be(&mut self) -> Option<u16> {
        Some(u16::from_be_bytes([self.next()?, self.next()?]))
    }

    fn read_i32_be(&mut self) -> Option<i32> {
        Some(i32::from_be_bytes([
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ]))
    }

    fn read_u32_be(&mut self) -> Option<u32> {
        Some(u32::from_be_bytes([
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ]))
    }

    fn read_i64_be(&mut self) -> Option<i64> {
        Some(i64::from_be_bytes([
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ]))
    }

    fn read_u64_be(&mut self) -> Option<u64> {
        Some(u64::from_be_bytes([
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ]))
    }

    fn read_i16_le(&mut self) -> Option<i16> {
        Some(i16::from_le_bytes([self.next()?, self.next()?]))
    }

    fn read_u16_le(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes([self.next()?, self.next()?]))
    }

    fn read_i32_le(&mut self) -> Option<i32> {
        Some(i32::from_le_bytes([
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ]))
    }

    fn read_u32_le(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes([
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ]))
    }

    fn read_i64_le(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes([
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ]))
    }

    fn read_u64_le(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes([
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ]))
    }
}

/// Decode `Self` from a little-endian byte stream.
///
/// Implemented for the primitive integer types directly on top of [`ByteIter`],
/// and for every on-disk structure in this crate so parsers can be written as
/// `Foo::from_bytes_le(&mut iter)?` regardless of whether `Foo` is a primitive
/// or a composite record.
pub trait FromBytesLE<It> {
    fn from_bytes_le(data: &mut It) -> Option<Self>
    where
        Self: Sized;
}

/// Decode `Self` from a byte stream whose endianness is determined from the
/// data itself (typically by peeking a magic number in both orders).
pub trait FromBytes<It> {
    fn from_bytes(data: &mut It) -> Option<Self>
    where
        Self: Sized;
}

macro_rules! impl_from_bytes_le_primitive {
    ($ty:ty, $read_fn:ident) => {
        impl<It> FromBytesLE<It> for $ty
        where
            It: Iterator<Item = u8>,
        {
            fn from_bytes_le(data: &mut It) -> Option<Self> {
                data.$read_fn()
            }
        }
    };
}

impl<It> FromBytesLE<It> for u8
where
    It: Iterator<Item = u8>,
{
    fn from_bytes_le(data: &mut It) -> Option<Self> {
        data.read_u8()
    }
}

impl<It> FromBytes<It> for u8
where
    It: Iterator<Item = u8>,
{
    fn from_bytes(data: &mut It) -> Option<Self> {
        data.read_u8()
    }
}

impl_from_bytes_le_primitive!(i16, read_i16_le);
impl_from_bytes_le_primitive!(u16, read_u16_le);
impl_from_bytes_le_primitive!(i32, read_i32_le);
impl_from_bytes_le_primitive!(u32, read_u32_le);
impl_from_bytes_le_primitive!(i64, read_i64_le);
impl_from_bytes_le_primitive!(u64, read_u64_le);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_u32_le() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(
            u32::from_bytes_le(&mut data.iter().copied()),
            Some(0x04030201)
        );
    }

    #[test]
    fn reads_u64_be() {
        let data = [0, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(data.iter().copied().read_u64_be(), Some(1));
    }

    #[test]
    fn skip_n_bytes_consumes_exactly_n() {
        let mut iter = [1u8, 2, 3, 4, 5].into_iter();
        iter.skip_n_bytes(2).unwrap();
        assert_eq!(iter.next(), Some(3));
    }

    #[test]
    fn skip_n_bytes_zero_is_noop() {
        let mut iter = [1u8, 2, 3].into_iter();
        iter.skip_n_bytes(0).unwrap();
        assert_eq!(iter.next(), Some(1));
    }

    #[test]
    fn short_read_returns_none() {
        let mut iter = [1u8].into_iter();
        assert_eq!(iter.read_u32_le(), None);
    }
}
