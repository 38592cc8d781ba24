// ABOUTME: The contract every domain store implements to be persisted by the engine.
// ABOUTME: Covers payload encoding, the decoding resolver, deep cloning and merge-on-load.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::envelope::{Envelope, EnvelopeError};

/// Errors raised by a store while encoding or decoding its own payload.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// An in-memory domain object that can be written to and restored from a
/// single store file.
///
/// The engine never looks inside a store. It only asks for an envelope on
/// write and hands the payload back to [`PersistableStore::decode_payload`]
/// (registered as the resolver for [`PersistableStore::TYPE_TAG`]) on read.
pub trait PersistableStore: Send + Sync + Sized + 'static {
    /// Globally unique identifier of the concrete store type.
    const TYPE_TAG: &'static str;

    fn encode_payload(&self) -> Result<Vec<u8>, StoreError>;

    fn decode_payload(payload: &[u8]) -> Result<Self, StoreError>;

    /// A deep copy that shares no mutable state with `self`.
    fn get_clone(&self) -> Self;

    /// Merge a freshly loaded snapshot into the live store.
    fn apply_persisted(&mut self, persisted: Self);

    fn to_envelope(&self) -> Result<Envelope, StoreError> {
        Ok(Envelope::new(Self::TYPE_TAG, self.encode_payload()?))
    }

    /// File name used when a client does not pick one: the type tag in snake_case.
    fn default_file_name() -> String {
        to_snake_case(Self::TYPE_TAG)
    }
}

/// Serialize a payload as JSON.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserialize a JSON payload.
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(payload)?)
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else if ch.is_ascii_alphanumeric() {
            out.push(ch);
            prev_lower = true;
        } else {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}
