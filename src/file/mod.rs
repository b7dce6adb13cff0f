//! Script file abstraction.
//!
//! This module abstracts over where compiled script bytes come from. A [`File`] owns a
//! [`Backend`], either a memory-mapped file on disk or an in-memory buffer, and exposes
//! bounds-checked access to its contents plus the NCS header check used by the decoder.
//!
//! # Key Components
//!
//! - [`File`] - Loaded script bytes
//! - [`Backend`] - Trait for the data sources
//! - [`parser::Parser`] - Cursor used by the instruction decoder
//! - [`io`] - Big-endian primitive readers and writers
//!
//! # Examples
//!
//! ```rust
//! use ncscope::File;
//!
//! let file = File::from_mem(b"NCS V1.0\x42\x00\x00\x00\x0D".to_vec())?;
//! assert_eq!(file.len(), 13);
//! assert!(file.has_valid_header());
//! # Ok::<(), ncscope::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{disassembler::NCS_MAGIC, Result};
use memory::Memory;
use physical::Physical;

/// Backend trait for file data sources.
///
/// This trait abstracts over the source of script data, allowing for both in-memory and
/// on-disk representations. All implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// A loaded compiled script.
///
/// Loading performs no validation; the decoder reports header and operand problems as
/// diagnostics so that a damaged file still yields a result.
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
}

impl File {
    /// Loads a script from the given path by memory-mapping it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Ok(Self::load(input))
    }

    /// Wraps a script that is already in memory.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` mirrors [`File::from_file`].
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Ok(Self::load(input))
    }

    fn load<T: Backend + 'static>(data: T) -> File {
        File {
            data: Box::new(data),
        }
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Returns the raw file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Returns a slice of the file contents.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the file.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// Returns `true` if the file starts with the `NCS V1.0` magic.
    #[must_use]
    pub fn has_valid_header(&self) -> bool {
        self.data
            .data_slice(0, NCS_MAGIC.len())
            .is_ok_and(|magic| magic == NCS_MAGIC)
    }
}
