//! Propagation configuration and its startup validation.

use crate::message::RESERVED_PROPERTY_NAMES;
use crate::tenant::TENANT_ID_KEY;

/// Where the tenant identifier is read from and written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationConfig {
    /// HTTP query parameter carrying the tenant on inbound requests.
    pub query_param: String,
    /// Message header reserved for the tenant on outbound/inbound messages.
    pub header_name: String,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            query_param: TENANT_ID_KEY.to_string(),
            header_name: TENANT_ID_KEY.to_string(),
        }
    }
}

/// Rejected propagation configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} must not contain leading or trailing whitespace: {value:?}")]
    Whitespace { field: &'static str, value: String },
    #[error("header {name:?} collides with reserved transport property {reserved:?}")]
    ReservedHeader { name: String, reserved: &'static str },
}

impl PropagationConfig {
    /// Checks the configuration before anything is wired to it.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_name("query_param", &self.query_param)?;
        check_name("header_name", &self.header_name)?;
        if let Some(reserved) = RESERVED_PROPERTY_NAMES
            .iter()
            .copied()
            .find(|reserved| reserved.eq_ignore_ascii_case(&self.header_name))
        {
            return Err(ConfigError::ReservedHeader {
                name: self.header_name.clone(),
                reserved,
            });
        }
        Ok(())
    }
}

fn check_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Empty { field });
    }
    if value.trim() != value {
        return Err(ConfigError::Whitespace {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
