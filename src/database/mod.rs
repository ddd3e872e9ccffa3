pub mod aggregate;
pub mod error;
pub mod manager;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod resolver;
pub mod store;

pub use error::{DatabaseError, StoreError};
pub use manager::DatabaseManager;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repository::EntityRepository;
pub use resolver::TargetResolver;
pub use store::{Collection, Document, DocumentStore, Update};
