//! Entity type descriptions and the registry that turns them into
//! tenant-scoped repositories.

pub mod catalog;
pub mod registry;

use std::collections::BTreeMap;

use serde::Serialize;

pub use registry::EntityRegistry;

/// Field holding the creator reference on ownership-enabled entity types.
pub const CREATED_BY: &str = "created_by";

/// Derived read-time flag added by the ownership resolver.
pub const CAN_EDIT: &str = "can_edit";

/// Logical schema for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySchema {
    name: String,
    collection: Option<String>,
    references: BTreeMap<String, String>,
    ownership: bool,
    owned_arrays: Vec<String>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            references: BTreeMap::new(),
            ownership: false,
            owned_arrays: Vec::new(),
        }
    }

    /// Explicit base collection name, used instead of the pluralized name.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Declares `field` as holding the id(s) of records of `entity`.
    pub fn reference(mut self, field: impl Into<String>, entity: impl Into<String>) -> Self {
        self.references.insert(field.into(), entity.into());
        self
    }

    /// Records carry `created_by` and get `can_edit` at read time.
    pub fn with_ownership(mut self) -> Self {
        self.ownership = true;
        self
    }

    /// Embedded array whose elements carry their own `created_by`.
    pub fn owned_array(mut self, field: impl Into<String>) -> Self {
        self.owned_arrays.push(field.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection_override(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn references(&self) -> &BTreeMap<String, String> {
        &self.references
    }

    pub fn reference_target(&self, field: &str) -> Option<&str> {
        self.references.get(field).map(String::as_str)
    }

    /// `id` and every declared reference hold identifiers.
    pub fn is_identifier_field(&self, field: &str) -> bool {
        field == "id" || self.references.contains_key(field)
    }

    pub fn has_ownership(&self) -> bool {
        self.ownership
    }

    pub fn owned_arrays(&self) -> &[String] {
        &self.owned_arrays
    }
}
