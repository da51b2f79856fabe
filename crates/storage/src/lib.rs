#![forbid(unsafe_code)]

pub mod content;
pub mod memory;
pub mod preferences;
pub mod repository;
pub mod rest;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use repository::{Storage, StorageError};
