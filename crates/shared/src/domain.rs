use std::fmt;

use serde::{Deserialize, Serialize};

/// Value a field holds after it passed validation; this is what goes on the wire.
pub type ParsedValue = serde_json::Value;

/// Opaque identifier of a listed record. Resources key their rows either by
/// number or by string; both forms compare and hash, numbers before strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Num(i64),
    Text(String),
}

impl EntityId {
    /// Parses operator input: anything that reads as an integer becomes a
    /// numeric id, everything else stays textual.
    pub fn parse_lenient(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(value) => Self::Num(value),
            Err(_) => Self::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}

impl From<i32> for EntityId {
    fn from(value: i32) -> Self {
        Self::Num(i64::from(value))
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

macro_rules! name_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

name_newtype!(FieldName);
name_newtype!(ResourceName);

/// One stageable cell: `(entity, field)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EditKey {
    pub entity_id: EntityId,
    pub field: FieldName,
}

impl EditKey {
    pub fn new(entity_id: impl Into<EntityId>, field: impl Into<FieldName>) -> Self {
        Self {
            entity_id: entity_id.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for EditKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity_id, self.field)
    }
}

/// A listed record. Everything except the id is resource specific and kept
/// as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Entity {
    pub fn field(&self, field: &FieldName) -> Option<&serde_json::Value> {
        self.fields.get(field.as_str())
    }

    /// Text shown in an edit cell before the operator touches it.
    pub fn display_value(&self, field: &FieldName) -> String {
        match self.field(field) {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        }
    }
}
