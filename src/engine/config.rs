//! Reconciler configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileResult, ValidationError};

/// Longest accepted store field name.
pub const MAX_FIELD_NAME_LENGTH: usize = 128;

/// How PERSIST submits a partitioned working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// One upsert batch when the store supports it, otherwise split.
    #[default]
    Auto,
    /// An update batch followed by a create batch.
    Split,
    /// Always one upsert batch; fails the batch if the store lacks upsert.
    Upsert,
}

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Store field holding the natural key.
    pub key_field: String,
    /// Batch submission strategy.
    pub persist_mode: PersistMode,
    /// Longest accepted natural key, in characters.
    pub max_key_length: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            key_field: "Name".to_string(),
            persist_mode: PersistMode::Auto,
            max_key_length: 255,
        }
    }
}

impl ReconcilerConfig {
    /// Checks field constraints.
    ///
    /// # Errors
    /// Returns `ValidationError::EmptyField` for a blank key field,
    /// `ValidationError::FieldTooLong` for an overlong one, and
    /// `ValidationError::InvalidConfig` for a zero key length.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.key_field.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "key_field".to_string(),
            });
        }
        if self.key_field.len() > MAX_FIELD_NAME_LENGTH {
            return Err(ValidationError::FieldTooLong {
                field: "key_field".to_string(),
                max_length: MAX_FIELD_NAME_LENGTH,
            });
        }

        if self.max_key_length == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_key_length must be at least 1".to_string(),
            });
        }

        Ok(self)
    }

    /// Parses and validates a JSON configuration. Missing fields take their
    /// defaults.
    ///
    /// # Errors
    /// Returns a validation error for malformed JSON or invalid values.
    pub fn from_json(json: &str) -> ReconcileResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        Ok(config.validate()?)
    }
}
