pub mod entities;
pub mod find;
pub mod health;
pub mod target;
