//! The write-ahead log that makes the remote store reliable.
//!
//! [`LocalWal`] buffers committed batches in an append-only, CRC-framed local
//! log and acknowledges them once durable. A background drainer ferries rows
//! to the remote object store with bounded parallelism; reads overlay
//! pending rows on top of the remote. `start` applies backpressure when the
//! backlog grows past the configured bound.

mod drain;
mod frame;
mod log;
mod replay;
mod store;

pub use store::{LocalWal, WalConfig};
