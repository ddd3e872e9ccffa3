//! Owner-based edit authorization.
//!
//! A record may be edited by its creator, or by an administrator when the
//! creator is also an administrator. Records without a creator are editable
//! by anyone. When the creator cannot be resolved the check fails closed.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::CONFIG;
use crate::context::ActingUser;
use crate::database::error::DatabaseError;
use crate::database::repository::EntityRepository;
use crate::database::store::Document;
use crate::entity::{EntitySchema, CAN_EDIT, CREATED_BY};

/// Looks up the role set of a user. `None` means the user does not exist.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn roles_of(&self, user: Uuid) -> Result<Option<Vec<String>>, DatabaseError>;
}

/// Role directory backed by the tenant's `User` collection.
pub struct UserDirectory {
    users: EntityRepository,
}

impl UserDirectory {
    pub fn new(users: EntityRepository) -> Self {
        Self { users }
    }
}

#[async_trait]
impl RoleDirectory for UserDirectory {
    async fn roles_of(&self, user: Uuid) -> Result<Option<Vec<String>>, DatabaseError> {
        let record = self.users.find_by_id(&user.to_string()).await?;
        Ok(record.map(|doc| roles_from(&doc)))
    }
}

/// Reads a `roles` array, falling back to a single `role` string.
pub fn roles_from(doc: &Document) -> Vec<String> {
    match (doc.get("roles"), doc.get("role")) {
        (Some(Value::Array(roles)), _) => roles
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        (_, Some(Value::String(role))) => vec![role.clone()],
        _ => Vec::new(),
    }
}

/// Creator of a record, if it has one. A populated creator is read from its
/// `id`. `Err(())` marks a creator that is present but not a valid id.
fn creator_of(record: &Document) -> Result<Option<Uuid>, ()> {
    let raw = match record.get(CREATED_BY) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.as_str(),
        Some(Value::Object(populated)) => match populated.get("id").and_then(Value::as_str) {
            Some(id) => id,
            None => return Err(()),
        },
        Some(_) => return Err(()),
    };
    Uuid::parse_str(raw).map(Some).map_err(|_| ())
}

/// Evaluates `can_edit`, caching role lookups for its own lifetime.
pub struct OwnershipResolver<'a> {
    directory: Option<&'a dyn RoleDirectory>,
    admin_roles: Vec<String>,
    roles: HashMap<Uuid, Option<Vec<String>>>,
}

impl<'a> OwnershipResolver<'a> {
    pub fn new(directory: Option<&'a dyn RoleDirectory>) -> Self {
        Self::with_admin_roles(directory, CONFIG.security.admin_roles.clone())
    }

    pub fn with_admin_roles(directory: Option<&'a dyn RoleDirectory>, admin_roles: Vec<String>) -> Self {
        Self {
            directory,
            admin_roles,
            roles: HashMap::new(),
        }
    }

    pub async fn can_edit(&mut self, record: &Document, actor: Option<ActingUser>) -> Result<bool, DatabaseError> {
        let creator = match creator_of(record) {
            Ok(None) => return Ok(true),
            Ok(Some(creator)) => creator,
            Err(()) => {
                debug!("Unresolvable creator on record {:?}", record.get("id"));
                return Ok(false);
            }
        };
        let Some(actor) = actor else {
            return Ok(false);
        };
        if actor.id == creator {
            return Ok(true);
        }

        // Both sides must be administrators
        if !self.is_admin(actor.id).await? {
            return Ok(false);
        }
        self.is_admin(creator).await
    }

    /// Sets `can_edit` on each record and on the elements of its owned arrays.
    pub async fn augment(
        &mut self,
        records: &mut [Document],
        schema: &EntitySchema,
        actor: Option<ActingUser>,
    ) -> Result<(), DatabaseError> {
        for record in records.iter_mut() {
            let allowed = self.can_edit(record, actor).await?;
            for field in schema.owned_arrays() {
                if let Some(Value::Array(items)) = record.get_mut(field) {
                    for item in items.iter_mut() {
                        if let Value::Object(item) = item {
                            let item_allowed = self.can_edit(item, actor).await?;
                            item.insert(CAN_EDIT.to_string(), Value::Bool(item_allowed));
                        }
                    }
                }
            }
            record.insert(CAN_EDIT.to_string(), Value::Bool(allowed));
        }
        Ok(())
    }

    async fn is_admin(&mut self, user: Uuid) -> Result<bool, DatabaseError> {
        let roles = match self.roles.get(&user) {
            Some(cached) => cached.clone(),
            None => {
                let looked_up = match self.directory {
                    Some(directory) => directory.roles_of(user).await?,
                    None => None,
                };
                self.roles.insert(user, looked_up.clone());
                looked_up
            }
        };
        Ok(roles
            .map(|roles| roles.iter().any(|r| self.admin_roles.contains(r)))
            .unwrap_or(false))
    }
}

/// One-shot `can_edit` for a single record.
pub async fn can_edit(
    record: &Document,
    actor: ActingUser,
    directory: &dyn RoleDirectory,
) -> Result<bool, DatabaseError> {
    OwnershipResolver::new(Some(directory)).can_edit(record, Some(actor)).await
}

/// Augments `records` of `schema` when the entity type carries ownership.
pub async fn augment_records(
    records: &mut [Document],
    schema: &EntitySchema,
    actor: Option<ActingUser>,
    directory: Option<&dyn RoleDirectory>,
) -> Result<(), DatabaseError> {
    if !schema.has_ownership() {
        return Ok(());
    }
    OwnershipResolver::new(directory).augment(records, schema, actor).await
}
