pub mod cli;
pub mod config;
pub mod context;
pub mod database;
pub mod entity;
pub mod filter;
pub mod observer;
pub mod ownership;
pub mod query;
pub mod testing;

pub use context::{ActingUser, RequestContext, TenantId};
pub use database::{DatabaseError, EntityRepository};
pub use entity::{EntityRegistry, EntitySchema};
pub use query::{Page, QueryDescriptor, QueryEngine};
