//! Authenticated encryption for block storage.

// aes-gcm relies on generic-array 0.14, so suppress the upstream deprecation locally.
#[allow(deprecated)]
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use std::collections::HashMap;
use std::io;
use zeroize::Zeroize;

use crate::block::hex_key;
use crate::cancel::CancelToken;
use crate::error::StorageError;
use crate::storage::BlockStorage;

// The salt is fixed so existing stores open with only the password. Changing
// it invalidates every block ever written.
const KDF_SALT: &[u8; 16] = b"7fedd6d671beec56";
const KDF_ITERATIONS: u32 = 4096;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Wraps a [`BlockStorage`] so every value is sealed with AES-256-GCM before
/// being stored and opened on the way back out.
///
/// The key is derived once from the password (PBKDF2-HMAC-SHA1, 4096
/// iterations) and lives for the life of the wrapper. Each write samples a
/// fresh random 96-bit nonce and binds the ciphertext to its block pointer by
/// authenticating the pointer's hex encoding as associated data, so a blob
/// copied to a different pointer fails to open. Stored layout:
/// `nonce(12) ‖ ciphertext ‖ tag(16)`.
///
/// Random nonces collide with non-negligible probability as the write count
/// approaches 2^32; keep the number of writes under a single password well
/// below that budget.
pub struct EncryptedBlocks<B> {
    base: B,
    cipher: Aes256Gcm,
}

impl<B: BlockStorage> EncryptedBlocks<B> {
    pub fn new(base: B, password: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha1>(password.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
        let cipher = Aes256Gcm::new(key_ref(&key));
        key.zeroize();
        Self { base, cipher }
    }

    pub fn into_inner(self) -> B {
        self.base
    }

    fn open(&self, ptr: u64, raw: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(StorageError::CorruptCiphertext);
        }
        let (nonce, rest) = raw.split_at(NONCE_LEN);
        let (body, tag) = rest.split_at(rest.len() - TAG_LEN);
        let aad = hex_key(ptr);
        let mut plaintext = body.to_vec();
        self.cipher
            .decrypt_in_place_detached(nonce_ref(nonce), aad.as_bytes(), &mut plaintext, tag_ref(tag))
            .map_err(|_| StorageError::CorruptCiphertext)?;
        Ok(plaintext)
    }
}

impl<B: BlockStorage> BlockStorage for EncryptedBlocks<B> {
    fn start(&mut self, cancel: &CancelToken) -> Result<(), StorageError> {
        self.base.start(cancel)
    }

    fn get(&mut self, ptr: u64) -> Result<Vec<u8>, StorageError> {
        let raw = self.base.get(ptr)?;
        self.open(ptr, raw)
    }

    fn get_many(&mut self, ptrs: &[u64]) -> Result<HashMap<u64, Vec<u8>>, StorageError> {
        let sealed = self.base.get_many(ptrs)?;
        let mut out = HashMap::with_capacity(sealed.len());
        for (ptr, raw) in sealed {
            out.insert(ptr, self.open(ptr, raw)?);
        }
        Ok(out)
    }

    fn set(&mut self, ptr: u64, data: Vec<u8>) -> Result<(), StorageError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|err| StorageError::Io(io::Error::new(io::ErrorKind::Other, err)))?;
        let aad = hex_key(ptr);
        let mut buffer = data;
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce_ref(&nonce), aad.as_bytes(), &mut buffer)
            .map_err(|_| StorageError::InvariantViolation("aead seal failure".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + buffer.len() + TAG_LEN);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&buffer);
        sealed.extend_from_slice(&tag);
        self.base.set(ptr, sealed)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.base.commit()
    }

    fn rollback(&mut self) {
        self.base.rollback()
    }
}

#[allow(deprecated)]
fn key_ref(bytes: &[u8; 32]) -> &Key<Aes256Gcm> {
    Key::<Aes256Gcm>::from_slice(bytes)
}

#[allow(deprecated)]
fn nonce_ref(bytes: &[u8]) -> &GenericArray<u8, <Aes256Gcm as AeadCore>::NonceSize> {
    GenericArray::from_slice(bytes)
}

#[allow(deprecated)]
fn tag_ref(bytes: &[u8]) -> &GenericArray<u8, <Aes256Gcm as AeadCore>::TagSize> {
    GenericArray::from_slice(bytes)
}
