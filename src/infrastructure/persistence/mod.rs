//! Persistence implementations

pub mod memory;
#[cfg(feature = "postgres")]
pub mod database;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use database::{create_pool, run_migrations, DatabaseConfig};
#[cfg(feature = "postgres")]
pub use postgres::PgEntityStore;

use crate::config::{Config, StoreBackend};
use crate::domain::shared::result::Result;
use crate::domain::store::EntityStore;
use std::sync::Arc;
use tracing::info;

/// Build the entity store selected by configuration
pub fn open_store(config: &Config) -> Result<Arc<dyn EntityStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory entity store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres => {
            info!("Using PostgreSQL entity store");
            let store = PgEntityStore::connect(&DatabaseConfig::from(&config.database))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreBackend::Postgres => Err(crate::domain::shared::error::DispatchError::StorageUnavailable(
            "built without the postgres feature".to_string(),
        )),
    }
}
