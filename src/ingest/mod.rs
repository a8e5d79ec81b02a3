//! Upload path to the remote ingest service.

mod client;
mod payload;

pub use client::{IngestClient, RETRY_CAP_MS};
pub use payload::{IngestAck, SessionPayload, VideoAck};
