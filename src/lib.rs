//! Encrypted, WAL-backed block storage over unreliable remote object stores.
//!
//! The stack, leaves first: an [`ObjectStorage`] driver over a remote store
//! (external), [`LocalWal`] buffering commits in a durable local log and
//! draining them asynchronously, a [`BufferedStorage`] transaction buffer
//! (external), the [`HexBlocks`] pointer-to-key adapter, and the
//! [`EncryptedBlocks`] AES-GCM envelope. [`BlockMemory`] is an in-memory
//! [`BlockStorage`] for tests.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]

pub mod block;
pub mod cancel;
pub mod error;
pub mod storage;
pub mod telemetry;
pub mod wal;

pub use block::{hex_key, BlockMemory, EncryptedBlocks, HexBlocks};
pub use cancel::CancelToken;
pub use error::StorageError;
pub use storage::{
    BlockStorage, BufferedStorage, DataType, ObjectStorage, ReliableStorage, WriteData,
};
pub use telemetry::{labeled, MetricsSnapshot, SharedMetricsRegistry};
pub use wal::{LocalWal, WalConfig};
