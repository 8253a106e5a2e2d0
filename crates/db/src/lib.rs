pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{
    load_typed, save_typed, InMemorySnapshotStore, RepositoryError, SnapshotInfo, SnapshotStore,
    SqlSnapshotStore, CONVERSATIONS_SNAPSHOT, INVENTORY_SNAPSHOT,
};
