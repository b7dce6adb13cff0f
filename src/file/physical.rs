//! Memory-mapped file backend.
//!
//! Compiled scripts are usually small, but batch runs over a whole game's script archive open
//! thousands of them; mapping avoids a copy per file.

use super::Backend;
use crate::{
    Error::{Error, FileError},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A file backend that uses memory-mapped I/O.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// [`crate::Error::Error`] if memory mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error(error.to_string())),
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if offset_end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_roundtrip_through_tempfile() {
        let path = std::env::temp_dir().join(format!("ncscope-physical-{}.ncs", std::process::id()));
        fs::write(&path, b"NCS V1.0\x42\x00\x00\x00\x0D").unwrap();

        let physical = Physical::new(&path).unwrap();
        assert_eq!(physical.len(), 13);
        assert_eq!(physical.data_slice(0, 8).unwrap(), b"NCS V1.0");
        assert!(physical.data_slice(10, 10).is_err());

        drop(physical);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_physical_missing_file() {
        let result = Physical::new("/nonexistent/ncscope/missing.ncs");
        assert!(matches!(result, Err(FileError(_))));
    }
}
