//! Error taxonomy for ingestion, rooms, and storage.
//!
//! Only conditions a caller must distinguish get a variant. Domain mismatch
//! is not an error (the adapter returns it as a normal outcome so webhooks
//! are still acknowledged) and a delete miss is a plain `false`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Recipient address is empty after lowercasing and trimming.
    #[error("invalid address: empty after normalization")]
    InvalidAddress,

    /// No usable recipient field anywhere in the webhook payload.
    #[error("webhook payload carries no recipient")]
    MissingRecipient,

    /// The mailbox store could not serve the request.
    #[error("mailbox store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
}
