#![allow(dead_code)]

use blockferry::{BufferedStorage, CancelToken, DataType, ObjectStorage, StorageError};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory [`ObjectStorage`] with scripted failures, standing in for the
/// high-latency remote store.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
}

#[derive(Default)]
struct RemoteState {
    objects: HashMap<String, (Vec<u8>, DataType)>,
    fail_next_sets: usize,
    fail_all_sets: bool,
    set_calls: usize,
    delete_calls: usize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: &[u8], data_type: DataType) {
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .insert(key.to_string(), (value.to_vec(), data_type));
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.objects.get(key).map(|(value, _)| value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// The next `n` `set` calls fail with a remote error.
    pub fn fail_next_sets(&self, n: usize) {
        self.state.lock().unwrap().fail_next_sets = n;
    }

    /// Every `set` call fails until turned off again.
    pub fn fail_all_sets(&self, fail: bool) {
        self.state.lock().unwrap().fail_all_sets = fail;
    }

    pub fn set_calls(&self) -> usize {
        self.state.lock().unwrap().set_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state.lock().unwrap().delete_calls
    }
}

impl ObjectStorage for MemoryRemote {
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(key)
            .map(|(value, _)| value.clone())
            .ok_or(StorageError::NotFound)
    }

    fn set(&self, key: &str, value: &[u8], data_type: DataType) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        state.set_calls += 1;
        if state.fail_all_sets {
            return Err(StorageError::Remote("injected set failure".into()));
        }
        if state.fail_next_sets > 0 {
            state.fail_next_sets -= 1;
            return Err(StorageError::Remote("injected set failure".into()));
        }
        state
            .objects
            .insert(key.to_string(), (value.to_vec(), data_type));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls += 1;
        state.objects.remove(key);
        Ok(())
    }
}

/// Minimal [`BufferedStorage`] double: stages writes until `commit`, reads
/// overlay staged values atop committed ones.
#[derive(Debug, Default)]
pub struct StagedBuffer {
    pub committed: HashMap<String, Vec<u8>>,
    pub staged: HashMap<String, Vec<u8>>,
    pub started: bool,
    pub commits: usize,
    pub rollbacks: usize,
}

impl StagedBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferedStorage for StagedBuffer {
    fn start(&mut self, _cancel: &CancelToken) -> Result<(), StorageError> {
        self.started = true;
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.staged
            .get(key)
            .or_else(|| self.committed.get(key))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn get_many(&mut self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, StorageError> {
        let mut out = HashMap::new();
        for key in keys {
            match self.get(key) {
                Ok(value) => {
                    out.insert(key.clone(), value);
                }
                Err(StorageError::NotFound) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.staged.insert(key.to_string(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let staged = std::mem::take(&mut self.staged);
        self.committed.extend(staged);
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged.clear();
        self.rollbacks += 1;
    }
}
