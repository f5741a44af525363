use thiserror::Error;

/// Errors surfaced by the storage stack.
///
/// The WAL absorbs remote failures during draining and retries them on its
/// own; callers only ever see local-store errors from `commit`. Cryptographic
/// failures are never retried.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key or pointer is not present at any layer.
    #[error("object not found")]
    NotFound,
    /// Authenticated decryption failed, or the stored blob is too short to
    /// contain a nonce and tag. Fatal for that block.
    #[error("ciphertext corrupt or truncated")]
    CorruptCiphertext,
    /// Local I/O or RNG failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The local durable log refused a commit. The batch is not in the WAL;
    /// the caller may retry.
    #[error("WAL write failed: {0}")]
    WalWrite(String),
    /// Programming error, e.g. a batched read returning a key that was never
    /// requested.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// The session was cancelled while blocked.
    #[error("operation cancelled")]
    Cancelled,
    /// Failure reported by the remote object store.
    #[error("remote storage error: {0}")]
    Remote(String),
}
