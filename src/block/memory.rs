//! In-memory block storage for tests.

use crate::cancel::CancelToken;
use crate::error::StorageError;
use crate::storage::BlockStorage;
use std::collections::HashMap;

/// Map-backed [`BlockStorage`]. Reads hand out copies, so callers can
/// mutate returned buffers without disturbing the stored block. Not a
/// concurrency boundary; callers serialize access.
#[derive(Debug, Clone, Default)]
pub struct BlockMemory {
    blocks: HashMap<u64, Vec<u8>>,
}

impl BlockMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStorage for BlockMemory {
    fn start(&mut self, _cancel: &CancelToken) -> Result<(), StorageError> {
        Ok(())
    }

    fn get(&mut self, ptr: u64) -> Result<Vec<u8>, StorageError> {
        self.blocks
            .get(&ptr)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn get_many(&mut self, ptrs: &[u64]) -> Result<HashMap<u64, Vec<u8>>, StorageError> {
        let mut out = HashMap::new();
        for ptr in ptrs {
            if let Some(value) = self.blocks.get(ptr) {
                out.insert(*ptr, value.clone());
            }
        }
        Ok(out)
    }

    fn set(&mut self, ptr: u64, data: Vec<u8>) -> Result<(), StorageError> {
        self.blocks.insert(ptr, data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn rollback(&mut self) {}
}
