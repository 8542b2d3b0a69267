//! PostgreSQL implementation of EntityStore
//!
//! The store owns a small tokio runtime and blocks on every query, giving
//! callers the same synchronous interface as the in-memory store. It must
//! not be called from inside an async task.

use crate::domain::shared::error::DispatchError;
use crate::domain::shared::result::Result;
use crate::domain::store::{EntityId, EntityStore, FieldWrite, Fields, Guard, Namespace};
use crate::infrastructure::persistence::database::{create_pool, run_migrations, DatabaseConfig};
use sqlx::{PgExecutor, PgPool};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

pub struct PgEntityStore {
    pool: PgPool,
    runtime: Runtime,
}

impl PgEntityStore {
    /// Connect, run migrations and return a ready store
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("switchboard-pg")
            .enable_all()
            .build()
            .map_err(|e| {
                DispatchError::StorageUnavailable(format!("failed to start runtime: {}", e))
            })?;

        let pool = runtime
            .block_on(async {
                let pool = create_pool(config).await?;
                run_migrations(&pool).await?;
                Ok::<_, sqlx::Error>(pool)
            })
            .map_err(storage_error)?;

        info!("PostgreSQL entity store ready");
        Ok(Self { pool, runtime })
    }

    fn block_on<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        self.runtime.block_on(future).map_err(storage_error)
    }

    async fn register_async(
        &self,
        namespace: Namespace,
        id: EntityId,
        fields: &Fields,
    ) -> std::result::Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO entity_index (namespace, id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(namespace.as_str())
        .bind(db_id(id))
        .execute(&mut *tx)
        .await?;

        for (field, value) in fields {
            upsert_field(&mut *tx, namespace, id, field, value).await?;
        }

        tx.commit().await
    }

    async fn delete_async(
        &self,
        namespace: Namespace,
        id: EntityId,
    ) -> std::result::Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM entity_index WHERE namespace = $1 AND id = $2")
            .bind(namespace.as_str())
            .bind(db_id(id))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM entity_fields WHERE namespace = $1 AND id = $2")
            .bind(namespace.as_str())
            .bind(db_id(id))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn compare_and_set_async(
        &self,
        guards: &[Guard],
        writes: &[FieldWrite],
    ) -> std::result::Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Lock every touched record in a fixed order so concurrent pairings
        // over overlapping records cannot deadlock
        let targets: BTreeSet<(Namespace, EntityId)> = guards
            .iter()
            .map(Guard::target)
            .chain(writes.iter().map(|w| (w.namespace, w.id)))
            .collect();

        let mut state: BTreeMap<(Namespace, EntityId), (bool, Fields)> = BTreeMap::new();
        for (namespace, id) in targets {
            let indexed = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM entity_index WHERE namespace = $1 AND id = $2 FOR UPDATE",
            )
            .bind(namespace.as_str())
            .bind(db_id(id))
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
            let fields = load_fields(&mut *tx, namespace, id).await?;
            state.insert((namespace, id), (indexed, fields));
        }

        let holds = guards.iter().all(|guard| {
            state
                .get(&guard.target())
                .map(|(indexed, fields)| guard.holds(*indexed, Some(fields)))
                .unwrap_or(false)
        });
        if !holds {
            tx.rollback().await?;
            return Ok(false);
        }

        for write in writes {
            upsert_field(&mut *tx, write.namespace, write.id, &write.field, &write.value).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn clear_async(&self, namespace: Namespace) -> std::result::Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM entity_fields WHERE namespace = $1")
            .bind(namespace.as_str())
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM entity_index WHERE namespace = $1")
            .bind(namespace.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed as usize)
    }
}

impl EntityStore for PgEntityStore {
    fn allocate_id(&self, namespace: Namespace) -> Result<EntityId> {
        // The sequence row is seeded from the highest live id and then only
        // ever moves forward under its row lock
        let id = self.block_on(
            sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO entity_sequences (namespace, last_id)
                VALUES ($1, COALESCE((SELECT MAX(id) FROM entity_index WHERE namespace = $1), 0) + 1)
                ON CONFLICT (namespace) DO UPDATE
                SET last_id = GREATEST(
                    entity_sequences.last_id,
                    COALESCE((SELECT MAX(id) FROM entity_index WHERE namespace = $1), 0)
                ) + 1
                RETURNING last_id
                "#,
            )
            .bind(namespace.as_str())
            .fetch_one(&self.pool),
        )?;

        debug!("Allocated {} id {}", namespace, id);
        Ok(id as EntityId)
    }

    fn register(&self, namespace: Namespace, id: EntityId, fields: &Fields) -> Result<()> {
        self.block_on(self.register_async(namespace, id, fields))?;
        debug!("Registered {}", namespace.record_key(id));
        Ok(())
    }

    fn get_all_fields(&self, namespace: Namespace, id: EntityId) -> Result<Fields> {
        self.block_on(load_fields(&self.pool, namespace, id))
    }

    fn set_field(
        &self,
        namespace: Namespace,
        id: EntityId,
        field: &str,
        value: &str,
    ) -> Result<()> {
        self.block_on(upsert_field(&self.pool, namespace, id, field, value))
    }

    fn delete(&self, namespace: Namespace, id: EntityId) -> Result<bool> {
        self.block_on(self.delete_async(namespace, id))
    }

    fn contains(&self, namespace: Namespace, id: EntityId) -> Result<bool> {
        self.block_on(
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM entity_index WHERE namespace = $1 AND id = $2)",
            )
            .bind(namespace.as_str())
            .bind(db_id(id))
            .fetch_one(&self.pool),
        )
    }

    fn list_ids(&self, namespace: Namespace) -> Result<BTreeSet<EntityId>> {
        let ids = self.block_on(
            sqlx::query_scalar::<_, i64>(
                "SELECT id FROM entity_index WHERE namespace = $1 ORDER BY id",
            )
            .bind(namespace.as_str())
            .fetch_all(&self.pool),
        )?;
        Ok(ids.into_iter().map(|id| id as EntityId).collect())
    }

    fn compare_and_set(&self, guards: &[Guard], writes: &[FieldWrite]) -> Result<bool> {
        self.block_on(self.compare_and_set_async(guards, writes))
    }

    fn clear(&self, namespace: Namespace) -> Result<usize> {
        self.block_on(self.clear_async(namespace))
    }
}

async fn load_fields<'e, E>(
    executor: E,
    namespace: Namespace,
    id: EntityId,
) -> std::result::Result<Fields, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT field, value FROM entity_fields WHERE namespace = $1 AND id = $2",
    )
    .bind(namespace.as_str())
    .bind(db_id(id))
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().collect())
}

async fn upsert_field<'e, E>(
    executor: E,
    namespace: Namespace,
    id: EntityId,
    field: &str,
    value: &str,
) -> std::result::Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO entity_fields (namespace, id, field, value)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (namespace, id, field) DO UPDATE SET value = EXCLUDED.value
        "#,
    )
    .bind(namespace.as_str())
    .bind(db_id(id))
    .bind(field)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}

fn db_id(id: EntityId) -> i64 {
    id as i64
}

fn storage_error(e: sqlx::Error) -> DispatchError {
    error!("Database error: {}", e);
    DispatchError::StorageUnavailable(format!("Database error: {}", e))
}
