//! Cursor-based binary parser over NCS bytecode.
//!
//! [`Parser`] wraps a byte slice and a position. All reads are bounds checked and advance the
//! position on success; a failed read leaves the position untouched so the caller can report
//! the offset at which decoding stopped.

use crate::{
    file::io::{read_be_at, NcsIO},
    Result,
};

/// A bounds-checked cursor over a byte slice.
///
/// # Examples
///
/// ```rust
/// use ncscope::Parser;
///
/// let data = [0x04, 0x03, 0x00, 0x00, 0x00, 0x05];
/// let mut parser = Parser::new(&data);
///
/// assert_eq!(parser.read_be::<u8>()?, 0x04);
/// assert_eq!(parser.read_be::<u8>()?, 0x03);
/// assert_eq!(parser.read_be::<i32>()?, 5);
/// assert!(!parser.has_more_data());
/// # Ok::<(), ncscope::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`Parser`] from a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying data buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there are unread bytes left.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the position to `pos`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Skip `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the skip would pass the end of the data.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let Some(target) = self.position.checked_add(step) else {
            return Err(out_of_bounds_error!());
        };
        self.seek(target)
    }

    /// Current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The complete underlying buffer.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns the next byte without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or_else(|| out_of_bounds_error!())
    }

    /// Read a big-endian `T` and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_be<T: NcsIO>(&mut self) -> Result<T> {
        read_be_at::<T>(self.data, &mut self.position)
    }

    /// Read `length` raw bytes and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| out_of_bounds_error!())?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a `u16` length prefix followed by that many bytes, decoded as a string.
    ///
    /// Script strings are single-byte; bytes outside ASCII are mapped one-to-one onto the
    /// first 256 code points.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the payload is truncated.
    pub fn read_prefixed_string(&mut self) -> Result<String> {
        let length = self.read_be::<u16>()?;
        let bytes = self.read_bytes(usize::from(length))?;
        Ok(bytes.iter().map(|&b| char::from(b)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_reads_and_positions() {
        let data = [0x00, 0x02, b'h', b'i', 0x7F];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.len(), 5);
        assert_eq!(parser.read_prefixed_string().unwrap(), "hi");
        assert_eq!(parser.pos(), 4);
        assert_eq!(parser.peek_byte().unwrap(), 0x7F);
        assert_eq!(parser.remaining(), 1);
        parser.advance_by(1).unwrap();
        assert!(!parser.has_more_data());
        assert!(parser.peek_byte().is_err());
    }

    #[test]
    fn test_parser_failed_read_keeps_position() {
        let data = [0x00, 0x09, b'a'];
        let mut parser = Parser::new(&data);

        assert!(parser.read_prefixed_string().is_err());
        // The length prefix was consumed, the truncated payload was not.
        assert_eq!(parser.pos(), 2);
        assert!(parser.read_be::<u32>().is_err());
        assert_eq!(parser.pos(), 2);
        assert!(parser.seek(4).is_err());
        assert!(parser.seek(3).is_ok());
    }
}
