//! Pointer-to-key adapter over a [`BufferedStorage`].

use crate::block::hex_key;
use crate::cancel::CancelToken;
use crate::error::StorageError;
use crate::storage::{BlockStorage, BufferedStorage};
use std::collections::HashMap;

/// Turns a string-keyed [`BufferedStorage`] into a [`BlockStorage`] by using
/// the hex encoding of each pointer as the key. Pure pass-through, no
/// caching.
pub struct HexBlocks<B> {
    base: B,
}

impl<B: BufferedStorage> HexBlocks<B> {
    pub fn new(base: B) -> Self {
        Self { base }
    }

    pub fn into_inner(self) -> B {
        self.base
    }
}

impl<B: BufferedStorage> BlockStorage for HexBlocks<B> {
    fn start(&mut self, cancel: &CancelToken) -> Result<(), StorageError> {
        self.base.start(cancel)
    }

    fn get(&mut self, ptr: u64) -> Result<Vec<u8>, StorageError> {
        self.base.get(&hex_key(ptr))
    }

    fn get_many(&mut self, ptrs: &[u64]) -> Result<HashMap<u64, Vec<u8>>, StorageError> {
        let mut keys = Vec::with_capacity(ptrs.len());
        let mut conversion = HashMap::with_capacity(ptrs.len());
        for ptr in ptrs {
            let key = hex_key(*ptr);
            keys.push(key.clone());
            conversion.insert(key, *ptr);
        }

        let data = self.base.get_many(&keys)?;
        let mut out = HashMap::with_capacity(data.len());
        for (key, value) in data {
            let ptr = conversion.get(&key).ok_or_else(|| {
                StorageError::InvariantViolation(format!(
                    "value returned for unrequested key {key:?}"
                ))
            })?;
            out.insert(*ptr, value);
        }
        Ok(out)
    }

    fn set(&mut self, ptr: u64, data: Vec<u8>) -> Result<(), StorageError> {
        self.base.set(&hex_key(ptr), data)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.base.commit()
    }

    fn rollback(&mut self) {
        self.base.rollback()
    }
}
