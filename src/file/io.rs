//! Low-level big-endian I/O primitives for NCS bytecode.
//!
//! Every multi-byte operand of the NCS format is stored in big-endian byte order, so this
//! module only exposes big-endian readers and writers. The [`NcsIO`] trait abstracts over the
//! primitive integer and float types that appear as operands.
//!
//! # Examples
//!
//! ```rust
//! use ncscope::file::io::{read_be_at, write_be_at};
//!
//! let mut buffer = [0u8; 6];
//! let mut offset = 0;
//! write_be_at(&mut buffer, &mut offset, -8_i32)?;
//! write_be_at(&mut buffer, &mut offset, 4_u16)?;
//!
//! let mut offset = 0;
//! assert_eq!(read_be_at::<i32>(&buffer, &mut offset)?, -8);
//! assert_eq!(read_be_at::<u16>(&buffer, &mut offset)?, 4);
//! # Ok::<(), ncscope::Error>(())
//! ```

use crate::Result;

/// Primitive types that can be read from and written to an NCS stream.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `i32`).
pub trait NcsIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in big-endian
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_ncs_io {
    ($($ty:ty => $n:literal),* $(,)?) => {
        $(
            impl NcsIO for $ty {
                type Bytes = [u8; $n];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_ncs_io!(u8 => 1, i8 => 1, u16 => 2, i16 => 2, u32 => 4, i32 => 4, f32 => 4);

/// Reads a value of type `T` in big-endian byte order at `offset` and advances the offset.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be_at<T: NcsIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;
    Ok(T::from_be_bytes(read))
}

/// Writes `value` in big-endian byte order at `offset` and advances the offset.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_be_at<T: NcsIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_be_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

/// Appends `value` in big-endian byte order to a growable buffer.
pub fn push_be<T: NcsIO>(buffer: &mut Vec<u8>, value: T) {
    buffer.extend_from_slice(value.to_be_bytes().as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_be_types() {
        let data = [0xFF, 0xFF, 0xFF, 0xF8, 0x00, 0x04];
        let mut offset = 0;
        assert_eq!(read_be_at::<i32>(&data, &mut offset).unwrap(), -8);
        assert_eq!(read_be_at::<u16>(&data, &mut offset).unwrap(), 4);
        assert_eq!(offset, 6);

        let float = 1.5_f32.to_be_bytes();
        let mut offset = 0;
        assert_eq!(read_be_at::<f32>(&float, &mut offset).unwrap(), 1.5);
    }

    #[test]
    fn test_read_be_out_of_bounds() {
        let data = [0x00, 0x01, 0x02];
        let mut offset = 0;
        assert!(matches!(
            read_be_at::<u32>(&data, &mut offset),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(offset, 0);

        let mut offset = usize::MAX;
        assert!(read_be_at::<u8>(&data, &mut offset).is_err());
    }

    #[test]
    fn test_write_be() {
        let mut data = [0u8; 4];
        let mut offset = 0;
        write_be_at(&mut data, &mut offset, 0x0102_u16).unwrap();
        write_be_at(&mut data, &mut offset, 0x03_u8).unwrap();
        assert_eq!(&data[..3], &[0x01, 0x02, 0x03]);
        assert!(write_be_at(&mut data, &mut offset, 1_u16).is_err());

        let mut buffer = Vec::new();
        push_be(&mut buffer, -1_i32);
        assert_eq!(buffer, vec![0xFF; 4]);
    }
}
