//! Entity types and identity management.
//!
//! An entity is identified two ways: by the caller through its natural key,
//! and by the backing store through a surrogate id assigned on creation.
//! Reconciliation is the act of matching the first to the second.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// Opaque, store-assigned record identifier.
///
/// Only a store creates these. The reconciliation core never mints one
/// itself; it only carries ids it has read back from a lookup or a write.
///
/// # Examples
///
/// ```
/// use kyrosync::SurrogateId;
///
/// // Inside a store implementation, on create:
/// let id = SurrogateId::new();
/// assert_ne!(id, SurrogateId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurrogateId(Uuid);

impl SurrogateId {
    /// Mints a fresh id for a newly created record.
    ///
    /// Intended for [`StoreClient`](crate::StoreClient) implementations.
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SurrogateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of record being reconciled.
///
/// Natural keys are only unique within one entity type; a pass always targets
/// exactly one type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityType {
    /// A customer or organization account.
    Account,
    /// A person, usually attached to an account.
    Contact,
    /// A sales opportunity, usually attached to an account.
    Opportunity,
    /// A custom entity type
    Custom(String),
}

impl TryFrom<String> for EntityType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.is_empty() {
            return Err("entity type cannot be empty".to_string());
        }

        let bytes = value.as_bytes();
        if bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"custom:") {
            let rest = value[7..].trim();
            if rest.is_empty() {
                return Err("custom entity type cannot be empty".to_string());
            }
            return Ok(Self::Custom(rest.to_string()));
        }

        Ok(if value.eq_ignore_ascii_case("account") {
            Self::Account
        } else if value.eq_ignore_ascii_case("contact") {
            Self::Contact
        } else if value.eq_ignore_ascii_case("opportunity") {
            Self::Opportunity
        } else {
            return Err(format!(
                "unknown entity type: {value}. Use a built-in type (account, contact, opportunity) or prefix custom types with custom:<name>"
            ));
        })
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account => write!(f, "account"),
            Self::Contact => write!(f, "contact"),
            Self::Opportunity => write!(f, "opportunity"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Normalizes a natural key for comparison.
///
/// Keys match case-insensitively and ignore surrounding whitespace, both in
/// the working set and in store lookups.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

/// A record identified by its natural key.
///
/// Callers build entities as desired state (no surrogate id). Stores return
/// them as persisted records (surrogate id and timestamps set).
///
/// # Examples
///
/// ```
/// use kyrosync::{Entity, EntityType, Value};
///
/// let acme = Entity::new(EntityType::Account, "Acme").with_attribute("Industry", "Tech");
/// assert_eq!(acme.natural_key, "Acme");
/// assert_eq!(acme.attribute("Industry"), Some(&Value::from("Tech")));
/// assert!(!acme.is_persisted());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// The type this record belongs to.
    pub entity_type: EntityType,

    /// Caller-meaningful identifying value (e.g. a name).
    pub natural_key: String,

    /// Store-assigned id; absent until persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surrogate_id: Option<SurrogateId>,

    /// Field values.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    /// When the store first persisted the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// When the store last wrote the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Creates a desired-state entity with no attributes.
    #[must_use]
    pub fn new(entity_type: EntityType, natural_key: impl Into<String>) -> Self {
        Self {
            entity_type,
            natural_key: natural_key.into(),
            surrogate_id: None,
            attributes: BTreeMap::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Returns this entity with `field` set to `value`.
    #[must_use]
    pub fn with_attribute(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_attribute(field, value);
        self
    }

    /// Returns this entity carrying the given surrogate id.
    ///
    /// Intended for store implementations and for tests that seed records.
    #[must_use]
    pub fn with_surrogate_id(mut self, id: SurrogateId) -> Self {
        self.surrogate_id = Some(id);
        self
    }

    /// Sets a field value, replacing any previous one.
    pub fn set_attribute(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(field.into(), value.into());
    }

    /// Returns a field value.
    #[must_use]
    pub fn attribute(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Returns the parent reference stored under `field`, if any.
    #[must_use]
    pub fn parent_ref(&self, field: &str) -> Option<SurrogateId> {
        self.attribute(field).and_then(Value::as_id)
    }

    /// Returns true if a store has assigned this entity a surrogate id.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        self.surrogate_id.is_some()
    }

    /// Returns the normalized natural key.
    #[must_use]
    pub fn normalized_key(&self) -> String {
        normalize_key(&self.natural_key)
    }

    /// Builds the record to write over an existing one.
    ///
    /// The desired attributes are carried over unchanged and the existing
    /// record's id is attached. Store-managed timestamps are left unset.
    #[must_use]
    pub fn merged_onto(&self, existing: SurrogateId) -> Self {
        Self {
            entity_type: self.entity_type.clone(),
            natural_key: self.natural_key.clone(),
            surrogate_id: Some(existing),
            attributes: self.attributes.clone(),
            created_at: None,
            updated_at: None,
        }
    }
}
