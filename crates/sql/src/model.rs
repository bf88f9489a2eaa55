//! Entity capability traits and the shared column groups entities embed.
//!
//! An entity is a serde struct. It names its table through [`Table`] and opts
//! into the by-primary-key and audit operations by implementing the matching
//! traits. Audit groups are meant to be `#[serde(flatten)]`ed:
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct Movie {
//!     id: Uuid,
//!     title: String,
//!     #[serde(flatten)]
//!     deleted: Deleted,
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pg::Value;

/// Column every by-primary-key operation filters on.
pub const PK_COLUMN: &str = "id";

/// Column marking a row as soft-deleted when non-null.
pub const DELETED_AT: &str = "deleted_at";

pub trait Table {
    fn table_name() -> &'static str;
}

pub trait PrimaryKey: Table {
    type Key: Into<Value>;

    fn primary_key(&self) -> Self::Key;
}

// ---------------------------------------------------------------------------
// Audit groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Created {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Updated {
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deleted {
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_by: Option<Uuid>,
}

impl Deleted {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Archived {
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived_by: Option<Uuid>,
}

impl Archived {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

pub trait CreatedAudit {
    fn created(&self) -> &Created;
    fn created_mut(&mut self) -> &mut Created;

    fn set_created_by(&mut self, actor: Uuid) {
        self.created_mut().created_by = Some(actor);
    }
}

pub trait UpdatedAudit {
    fn updated(&self) -> &Updated;
    fn updated_mut(&mut self) -> &mut Updated;

    fn set_updated_by(&mut self, actor: Uuid) {
        self.updated_mut().updated_by = Some(actor);
    }
}

pub trait DeletedAudit {
    fn deleted(&self) -> &Deleted;
    fn deleted_mut(&mut self) -> &mut Deleted;

    fn set_deleted_by(&mut self, actor: Uuid) {
        self.deleted_mut().deleted_by = Some(actor);
    }
}

pub trait ArchivedAudit {
    fn archived(&self) -> &Archived;
    fn archived_mut(&mut self) -> &mut Archived;

    fn set_archived_by(&mut self, actor: Uuid) {
        self.archived_mut().archived_by = Some(actor);
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// A free-form `settings` JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

impl Settings {
    /// Store `value` under `key`. A value that serializes to `null` removes
    /// the key.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        let mut all = self.all()?;
        if value.is_null() {
            all.remove(key);
        } else {
            all.insert(key.to_owned(), value);
        }
        self.settings = Some(serde_json::Value::Object(all));
        Ok(())
    }

    /// Every setting; empty when the document is absent.
    pub fn all(&self) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        match &self.settings {
            None | Some(serde_json::Value::Null) => Ok(serde_json::Map::new()),
            Some(doc) => serde_json::from_value(doc.clone()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        matches!(&self.settings, Some(serde_json::Value::Object(map)) if map.contains_key(key))
    }

    /// Decode `key` as `T`, or return `default` when it is missing. Integral
    /// targets accept floating JSON numbers and truncate them.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, serde_json::Error> {
        let all = self.all()?;
        let Some(value) = all.get(key) else {
            return Ok(default);
        };
        match serde_json::from_value(value.clone()) {
            Ok(decoded) => Ok(decoded),
            Err(err) => match value.as_f64() {
                Some(f) if value.is_f64() => serde_json::from_value(serde_json::json!(f as i64)),
                _ => Err(err),
            },
        }
    }
}

pub trait HasSettings {
    fn settings(&self) -> &Settings;
    fn settings_mut(&mut self) -> &mut Settings;
}
