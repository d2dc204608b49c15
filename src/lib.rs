pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod inventory;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod wal;

pub use coordinator::{CoordinatorConfig, SyncCoordinator};
pub use error::EngineError;
