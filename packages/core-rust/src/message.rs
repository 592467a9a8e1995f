//! Message model shared by publishers, brokers and listeners.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError, ContentType};

/// Transport property names. Headers must never reuse them.
pub const RESERVED_PROPERTY_NAMES: [&str; 4] = ["messageId", "correlationId", "replyTo", "contentType"];

/// Out-of-band attributes attached to a message, independent of its body.
///
/// Keys are kept ordered so logs and encoded messages are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Sets `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Transport-level properties of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageProperties {
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reply_to: Option<String>,
    pub content_type: ContentType,
    #[serde(default)]
    pub headers: Headers,
}

impl MessageProperties {
    #[must_use]
    pub fn new(content_type: ContentType) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
            reply_to: None,
            content_type,
            headers: Headers::new(),
        }
    }
}

/// A unit of transmission: properties plus an opaque body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub properties: MessageProperties,
    pub body: Bytes,
}

impl Message {
    #[must_use]
    pub fn new(body: impl Into<Bytes>, content_type: ContentType) -> Self {
        Self {
            properties: MessageProperties::new(content_type),
            body: body.into(),
        }
    }

    /// Plain-text message.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(body.into(), ContentType::Text)
    }

    /// Encodes `value` into a new message.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if `value` cannot be encoded.
    pub fn encode<T>(value: &T, content_type: ContentType) -> Result<Self, CodecError>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self::new(codec::encode(content_type, value)?, content_type))
    }

    /// Decodes the body according to the message's content type.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the body does not decode into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        codec::decode(self.properties.content_type, &self.body)
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.properties.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.properties.headers
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.headers.insert(key, value);
        self
    }
}
