use super::Backend;
use crate::Result;

/// Input file backed by Memory
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Create a new memory backend
    ///
    /// ## Arguments
    /// * 'data' - The data buffer to consume
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
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
        self.data.as_slice()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_memory_slices() {
        let mut script = b"NCS V1.0".to_vec();
        script.extend_from_slice(&[0x42, 0x00, 0x00, 0x00, 0x0D]);
        let memory = Memory::new(script);

        assert_eq!(memory.len(), 13);
        assert_eq!(memory.data_slice(0, 8).unwrap(), b"NCS V1.0");
        assert_eq!(memory.data_slice(8, 1).unwrap(), &[0x42]);
        assert!(memory.data_slice(12, 2).is_err());
        assert!(matches!(
            memory.data_slice(usize::MAX, 1),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_memory_empty_buffer() {
        let memory = Memory::new(vec![]);

        assert_eq!(memory.len(), 0);
        assert!(memory.data_slice(0, 1).is_err());
        let empty_slice: &[u8] = &[];
        assert_eq!(memory.data_slice(0, 0).unwrap(), empty_slice);
    }
}
