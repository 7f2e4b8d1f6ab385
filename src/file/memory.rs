use super::Backend;

/// Input image held in an owned heap buffer
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

    #[test]
    fn memory() {
        let mut data = vec![0x00_u8; 112];
        data[..8].copy_from_slice(b"dex\n035\0");

        let memory = Memory::new(data);

        assert_eq!(memory.len(), 112);
        assert_eq!(&memory.data()[..4], b"dex\n");
    }

    #[test]
    fn empty_buffer() {
        let memory = Memory::new(Vec::new());
        assert_eq!(memory.len(), 0);
        assert!(memory.data().is_empty());
    }
}
