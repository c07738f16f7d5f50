//! Inbound webhook ingestion.
//!
//! Provider-specific payload shapes are adapted into one canonical
//! `InboundMessage`; raw MIME blobs are recovered through `mailparse`.

mod adapter;
mod mime;

pub use adapter::{adapt, Ingested, Provider};
