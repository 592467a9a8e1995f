//! Body codecs for message payloads.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Encoding of a message body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    /// UTF-8 JSON (`serde_json`).
    #[default]
    Json,
    /// Named-field `MsgPack` (`rmp_serde::to_vec_named`).
    MsgPack,
    /// Plain UTF-8 text. Values must serialize to a JSON string or scalar.
    Text,
    /// Raw bytes, never decoded.
    Binary,
}

impl ContentType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::MsgPack => "application/msgpack",
            Self::Text => "text/plain",
            Self::Binary => "application/octet-stream",
        }
    }
}

/// Errors from encoding or decoding a message body.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
    #[error("msgpack encode: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("text body is not valid UTF-8")]
    InvalidUtf8,
    #[error("binary bodies cannot be converted")]
    Unsupported,
}

/// Encodes `value` as a body of the given content type.
///
/// # Errors
///
/// Returns `CodecError` if the value cannot be represented in the encoding.
pub fn encode<T>(content_type: ContentType, value: &T) -> Result<Bytes, CodecError>
where
    T: Serialize + ?Sized,
{
    match content_type {
        ContentType::Json => Ok(Bytes::from(serde_json::to_vec(value)?)),
        ContentType::MsgPack => Ok(Bytes::from(rmp_serde::to_vec_named(value)?)),
        ContentType::Text => match serde_json::to_value(value)? {
            serde_json::Value::String(s) => Ok(Bytes::from(s)),
            other => Ok(Bytes::from(other.to_string())),
        },
        ContentType::Binary => Err(CodecError::Unsupported),
    }
}

/// Decodes a body of the given content type.
///
/// # Errors
///
/// Returns `CodecError` if the body does not match the encoding or the target type.
pub fn decode<T>(content_type: ContentType, body: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    match content_type {
        ContentType::Json => Ok(serde_json::from_slice(body)?),
        ContentType::MsgPack => Ok(rmp_serde::from_slice(body)?),
        ContentType::Text => {
            let text = std::str::from_utf8(body).map_err(|_| CodecError::InvalidUtf8)?;
            Ok(serde_json::from_value(serde_json::Value::String(text.to_owned()))?)
        }
        ContentType::Binary => Err(CodecError::Unsupported),
    }
}
