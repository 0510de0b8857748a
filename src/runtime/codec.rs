use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Symmetric JSON codec for stored records. The namespace does not change
/// the wire format; it tags errors so a corrupt value names the keyspace it
/// came from. Decoding never retains the input buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct Encoder;

impl Encoder {
    pub fn encode<T: Serialize>(&self, namespace: &str, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).with_context(|| format!("encode failed in namespace {namespace}"))
    }

    pub fn decode<T: DeserializeOwned>(&self, namespace: &str, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .with_context(|| format!("decode failed in namespace {namespace}"))
    }
}
