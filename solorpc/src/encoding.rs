//! Pluggable message encodings.
//!
//! Streams move opaque bytes. An [`Encoding`] turns application messages into
//! those bytes and back, and is chosen per call by whoever drives the stream.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Error;

/// Marshals and unmarshals messages of type `M`.
///
/// # Example
///
/// ```ignore
/// use solorpc::{Encoding, Error};
/// use bytes::Bytes;
///
/// struct Utf8;
///
/// impl Encoding<String> for Utf8 {
///     fn marshal(&self, msg: &String) -> Result<Bytes, Error> {
///         Ok(Bytes::copy_from_slice(msg.as_bytes()))
///     }
///
///     fn unmarshal(&self, data: &[u8]) -> Result<String, Error> {
///         String::from_utf8(data.to_vec()).map_err(|e| Error::Decode(e.to_string()))
///     }
/// }
/// ```
pub trait Encoding<M>: Send + Sync {
    fn marshal(&self, msg: &M) -> Result<Bytes, Error>;

    fn unmarshal(&self, data: &[u8]) -> Result<M, Error>;
}

/// JSON via `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEncoding;

impl<M> Encoding<M> for JsonEncoding
where
    M: Serialize + DeserializeOwned,
{
    fn marshal(&self, msg: &M) -> Result<Bytes, Error> {
        serde_json::to_vec(msg)
            .map(Bytes::from)
            .map_err(|e| Error::Encode(format!("JSON encoding failed: {}", e)))
    }

    fn unmarshal(&self, data: &[u8]) -> Result<M, Error> {
        serde_json::from_slice(data)
            .map_err(|e| Error::Decode(format!("JSON decoding failed: {}", e)))
    }
}

/// Protobuf via `prost`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProstEncoding;

impl<M> Encoding<M> for ProstEncoding
where
    M: prost::Message + Default,
{
    fn marshal(&self, msg: &M) -> Result<Bytes, Error> {
        Ok(Bytes::from(msg.encode_to_vec()))
    }

    fn unmarshal(&self, data: &[u8]) -> Result<M, Error> {
        M::decode(data).map_err(|e| Error::Decode(format!("protobuf decoding failed: {}", e)))
    }
}

/// Passes bytes through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawEncoding;

impl Encoding<Bytes> for RawEncoding {
    fn marshal(&self, msg: &Bytes) -> Result<Bytes, Error> {
        Ok(msg.clone())
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Bytes, Error> {
        Ok(Bytes::copy_from_slice(data))
    }
}
