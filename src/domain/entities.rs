//! Entity records as seen by the cache layer.

use super::types::{FieldMap, Scalar};

/// A single row, addressed by primary key or by a set of field values.
///
/// The cache never owns entities; it materializes them from a store row or a
/// cache hash and hands them back to the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity {
    fields: FieldMap,
    /// Field conditions the entity was looked up by, kept for later writes.
    conditions: FieldMap,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: FieldMap) -> Self {
        Self {
            fields,
            conditions: FieldMap::new(),
        }
    }

    pub(crate) fn with_conditions(mut self, conditions: FieldMap) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Scalar>) -> &mut Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn into_fields(self) -> FieldMap {
        self.fields
    }

    /// Conditions a cache-backed lookup resolved; empty for rows built directly.
    pub fn conditions(&self) -> &FieldMap {
        &self.conditions
    }
}

/// What a caller hands to `find`: a bare primary key value or field conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    PrimaryKey(Scalar),
    Fields(FieldMap),
}

impl Identity {
    /// Normalize into a field map, keying a bare value by `primary_key`.
    pub fn into_fields(self, primary_key: &str) -> FieldMap {
        match self {
            Self::PrimaryKey(value) => {
                let mut map = FieldMap::new();
                map.insert(primary_key.to_string(), value);
                map
            }
            Self::Fields(map) => map,
        }
    }
}

impl From<Scalar> for Identity {
    fn from(value: Scalar) -> Self {
        Self::PrimaryKey(value)
    }
}

impl From<i64> for Identity {
    fn from(value: i64) -> Self {
        Self::PrimaryKey(Scalar::Int(value))
    }
}

impl From<i32> for Identity {
    fn from(value: i32) -> Self {
        Self::PrimaryKey(Scalar::Int(value.into()))
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::PrimaryKey(Scalar::from(value))
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self::PrimaryKey(Scalar::Text(value))
    }
}

impl From<FieldMap> for Identity {
    fn from(value: FieldMap) -> Self {
        Self::Fields(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::fields;

    #[test]
    fn scalar_identity_is_keyed_by_primary_key() {
        let map = Identity::from(7).into_fields("id");
        assert_eq!(map, fields([("id", 7)]));
    }

    #[test]
    fn field_identity_is_used_as_is() {
        let conditions = fields([("email", "a@example.com")]);
        let map = Identity::from(conditions.clone()).into_fields("id");
        assert_eq!(map, conditions);
    }

    #[test]
    fn set_overwrites_existing_field() {
        let mut entity = Entity::new();
        entity.set("name", "A").set("name", "B");
        assert_eq!(entity.get("name").and_then(Scalar::as_str), Some("B"));
        assert!(entity.conditions().is_empty());
    }
}
