use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reserved key under which the tenant identifier travels, both as the HTTP
/// query parameter and as the message header.
pub const TENANT_ID_KEY: &str = "tenantId";

/// Opaque identifier of the tenant a unit of work belongs to.
///
/// No internal structure is assumed: two identifiers are equal only when
/// their strings are byte-for-byte equal. The only rejected value is the
/// empty string, which every boundary treats as "no tenant".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

/// Error returned when a tenant identifier cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TenantIdError {
    #[error("tenant identifier must not be empty")]
    Empty,
}

impl TenantId {
    /// Creates a tenant identifier.
    ///
    /// # Errors
    ///
    /// Returns `TenantIdError::Empty` for an empty string.
    pub fn new(value: impl Into<String>) -> Result<Self, TenantIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(TenantIdError::Empty);
        }
        Ok(Self(value))
    }

    /// Lenient constructor for transport values: empty means absent.
    #[must_use]
    pub fn from_transport(value: &str) -> Option<Self> {
        Self::new(value).ok()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenantIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
