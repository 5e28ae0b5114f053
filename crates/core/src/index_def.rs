//! Index definitions shared between the index manager (`wise-json-storage`)
//! and the checkpoint format (`wise-json-durability`), so neither crate
//! has to depend on the other just to describe "a field is indexed,
//! optionally uniquely".

use serde::{Deserialize, Serialize};

/// Kind of secondary index (spec.md §3, "Index").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// A plain value→ids index with no cardinality constraint.
    Standard,
    /// Additionally guarantees at most one document per value.
    Unique,
}

/// One index definition: a field name plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// The indexed document field.
    pub field_name: String,
    /// Whether the index enforces uniqueness.
    #[serde(rename = "type")]
    pub index_type: IndexType,
}

impl IndexDef {
    /// Construct a definition for a standard (non-unique) index.
    pub fn standard(field_name: impl Into<String>) -> Self {
        IndexDef {
            field_name: field_name.into(),
            index_type: IndexType::Standard,
        }
    }

    /// Construct a definition for a unique index.
    pub fn unique(field_name: impl Into<String>) -> Self {
        IndexDef {
            field_name: field_name.into(),
            index_type: IndexType::Unique,
        }
    }

    /// `true` if this definition enforces uniqueness.
    pub fn is_unique(&self) -> bool {
        self.index_type == IndexType::Unique
    }
}
