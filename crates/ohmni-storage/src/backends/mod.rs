//! Durable storage backends.

pub mod redb;

pub use self::redb::{RedbStore, RedbStoreConfig};
