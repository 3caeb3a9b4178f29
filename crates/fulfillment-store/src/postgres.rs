use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{LineItemId, ListingId, OrderId, ShipmentId, Version};
use domain::{
    CarrierShipmentId, CompensationTask, Entity, LineItem, LineItemStatus, Listing, Order, Pickup,
    Shipment, ShipmentStatus, ShipmentTracker,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Lease, Result, StoreError, TransitionRecord,
    store::{FulfillmentStore, UnitOfWork},
};

/// Value of an indexed column stored next to the entity state.
enum Column {
    Text(String),
    Uuid(Option<Uuid>),
    Bool(bool),
}

/// How an entity maps onto its table.
trait Stored: Entity {
    const TABLE: &'static str;

    /// Indexed columns besides `id`, `version` and `state`.
    fn columns(&self) -> Vec<(&'static str, Column)> {
        Vec::new()
    }

    /// Maps a violated unique constraint to a domain-level error.
    fn unique_violation(&self, _constraint: &str) -> Option<StoreError> {
        None
    }
}

impl Stored for Order {
    const TABLE: &'static str = "orders";
}

impl Stored for Listing {
    const TABLE: &'static str = "listings";
}

impl Stored for LineItem {
    const TABLE: &'static str = "line_items";

    fn columns(&self) -> Vec<(&'static str, Column)> {
        vec![("status", Column::Text(self.status().as_str().to_string()))]
    }
}

impl Stored for Shipment {
    const TABLE: &'static str = "shipments";

    fn columns(&self) -> Vec<(&'static str, Column)> {
        vec![
            (
                "carrier_shipment_id",
                Column::Text(self.carrier_shipment_id().as_str().to_string()),
            ),
            (
                "line_item_id",
                Column::Uuid(self.line_item_id().map(|id| id.as_uuid())),
            ),
            ("status", Column::Text(self.status().as_str().to_string())),
        ]
    }

    fn unique_violation(&self, constraint: &str) -> Option<StoreError> {
        match constraint {
            "unique_carrier_shipment_id" => Some(StoreError::DuplicateCarrierShipment(
                self.carrier_shipment_id().clone(),
            )),
            "unique_shipment_line_item" => self
                .line_item_id()
                .map(StoreError::DuplicateShipmentForLineItem),
            _ => None,
        }
    }
}

impl Stored for ShipmentTracker {
    const TABLE: &'static str = "shipment_trackers";
}

impl Stored for Pickup {
    const TABLE: &'static str = "pickups";

    fn columns(&self) -> Vec<(&'static str, Column)> {
        vec![("status", Column::Text(self.status().as_str().to_string()))]
    }
}

impl Stored for CompensationTask {
    const TABLE: &'static str = "compensation_tasks";

    fn columns(&self) -> Vec<(&'static str, Column)> {
        vec![
            ("line_item_id", Column::Uuid(Some(self.line_item_id().as_uuid()))),
            ("pending", Column::Bool(self.is_pending())),
        ]
    }
}

fn decode<E: Stored>(row: PgRow) -> Result<E> {
    let version: i64 = row.try_get("version")?;
    let state: serde_json::Value = row.try_get("state")?;
    let mut entity: E = serde_json::from_value(state).map_err(|e| StoreError::Corrupt {
        entity_type: E::entity_type(),
        message: e.to_string(),
    })?;
    entity.set_version(Version::new(version));
    Ok(entity)
}

fn map_write_error<E: Stored>(entity: &E, error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = error
        && let Some(constraint) = db_err.constraint()
    {
        if let Some(mapped) = entity.unique_violation(constraint) {
            return mapped;
        }
        if constraint.ends_with("_pkey") {
            return StoreError::ConcurrencyConflict {
                entity_type: E::entity_type(),
                entity_id: entity.entity_id(),
                expected: entity.version(),
            };
        }
    }
    StoreError::Database(error)
}

/// Inserts a new row or updates the row at the expected version.
async fn save<E: Stored>(conn: &mut PgConnection, entity: &E) -> Result<()> {
    let state = serde_json::to_value(entity)?;
    let expected = entity.version();
    let columns = entity.columns();
    let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();

    let sql = if expected.is_initial() {
        let placeholders: Vec<String> = (0..names.len()).map(|i| format!("${}", i + 4)).collect();
        let mut extra_names = String::new();
        for name in &names {
            extra_names.push_str(", ");
            extra_names.push_str(name);
        }
        let mut extra_values = String::new();
        for placeholder in &placeholders {
            extra_values.push_str(", ");
            extra_values.push_str(placeholder);
        }
        format!(
            "INSERT INTO {} (id, version, state{extra_names}) VALUES ($1, $2, $3{extra_values})",
            E::TABLE
        )
    } else {
        let mut assignments = String::new();
        for (i, name) in names.iter().enumerate() {
            assignments.push_str(&format!(", {} = ${}", name, i + 4));
        }
        format!(
            "UPDATE {} SET version = $2, state = $3, updated_at = NOW(){assignments} \
             WHERE id = $1 AND version = ${}",
            E::TABLE,
            names.len() + 4
        )
    };

    let mut query = sqlx::query(&sql)
        .bind(entity.entity_id())
        .bind(expected.next().as_i64())
        .bind(state);
    for (_, column) in columns {
        query = match column {
            Column::Text(value) => query.bind(value),
            Column::Uuid(value) => query.bind(value),
            Column::Bool(value) => query.bind(value),
        };
    }
    if !expected.is_initial() {
        query = query.bind(expected.as_i64());
    }

    let result = query
        .execute(&mut *conn)
        .await
        .map_err(|e| map_write_error(entity, e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::ConcurrencyConflict {
            entity_type: E::entity_type(),
            entity_id: entity.entity_id(),
            expected,
        });
    }
    Ok(())
}

async fn delete<E: Stored>(conn: &mut PgConnection, entity: &E) -> Result<()> {
    let sql = format!("DELETE FROM {} WHERE id = $1 AND version = $2", E::TABLE);
    let result = sqlx::query(&sql)
        .bind(entity.entity_id())
        .bind(entity.version().as_i64())
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::ConcurrencyConflict {
            entity_type: E::entity_type(),
            entity_id: entity.entity_id(),
            expected: entity.version(),
        });
    }
    Ok(())
}

async fn save_all<E: Stored>(conn: &mut PgConnection, entities: &[E]) -> Result<()> {
    for entity in entities {
        save(conn, entity).await?;
    }
    Ok(())
}

/// PostgreSQL-backed fulfillment store.
#[derive(Clone)]
pub struct PostgresFulfillmentStore {
    pool: PgPool,
}

impl PostgresFulfillmentStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn find_one<E: Stored>(&self, filter: &str, key: Uuid) -> Result<Option<E>> {
        let sql = format!("SELECT version, state FROM {} WHERE {filter} = $1", E::TABLE);
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode::<E>).transpose()
    }

    async fn find_by_status<E: Stored>(&self, statuses: Vec<String>) -> Result<Vec<E>> {
        let sql = format!(
            "SELECT version, state FROM {} WHERE status = ANY($1) ORDER BY updated_at ASC, id ASC",
            E::TABLE
        );
        let rows = sqlx::query(&sql)
            .bind(statuses)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(decode::<E>).collect()
    }
}

#[async_trait]
impl FulfillmentStore for PostgresFulfillmentStore {
    async fn commit(&self, unit: UnitOfWork) -> Result<UnitOfWork> {
        let mut tx = self.pool.begin().await?;

        save_all(&mut *tx, &unit.orders).await?;
        save_all(&mut *tx, &unit.listings).await?;
        save_all(&mut *tx, &unit.line_items).await?;
        // Shipments before the rows that reference them
        save_all(&mut *tx, &unit.shipments).await?;
        save_all(&mut *tx, &unit.trackers).await?;
        save_all(&mut *tx, &unit.pickups).await?;
        for pickup in &unit.deleted_pickups {
            delete(&mut *tx, pickup).await?;
        }
        save_all(&mut *tx, &unit.compensations).await?;

        for record in &unit.history {
            sqlx::query(
                r#"
                INSERT INTO transition_history
                    (id, entity_type, entity_id, action, from_status, to_status, reason, recorded_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(record.id)
            .bind(&record.entity_type)
            .bind(record.entity_id)
            .bind(&record.action)
            .bind(&record.from_status)
            .bind(&record.to_status)
            .bind(&record.reason)
            .bind(record.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        metrics::counter!("fulfillment_store_commits_total").increment(1);
        Ok(unit.into_committed())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.find_one("id", id.as_uuid()).await
    }

    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>> {
        self.find_one("id", id.as_uuid()).await
    }

    async fn get_line_item(&self, id: LineItemId) -> Result<Option<LineItem>> {
        self.find_one("id", id.as_uuid()).await
    }

    async fn line_items_with_status(&self, statuses: &[LineItemStatus]) -> Result<Vec<LineItem>> {
        let statuses = statuses.iter().map(|s| s.as_str().to_string()).collect();
        self.find_by_status(statuses).await
    }

    async fn get_shipment(&self, id: ShipmentId) -> Result<Option<Shipment>> {
        self.find_one("id", id.as_uuid()).await
    }

    async fn shipment_by_carrier_id(&self, id: &CarrierShipmentId) -> Result<Option<Shipment>> {
        let row = sqlx::query("SELECT version, state FROM shipments WHERE carrier_shipment_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode::<Shipment>).transpose()
    }

    async fn shipment_for_line_item(&self, id: LineItemId) -> Result<Option<Shipment>> {
        self.find_one("line_item_id", id.as_uuid()).await
    }

    async fn shipments_with_status(&self, statuses: &[ShipmentStatus]) -> Result<Vec<Shipment>> {
        let statuses = statuses.iter().map(|s| s.as_str().to_string()).collect();
        self.find_by_status(statuses).await
    }

    async fn tracker_for_shipment(&self, id: ShipmentId) -> Result<Option<ShipmentTracker>> {
        self.find_one("id", id.as_uuid()).await
    }

    async fn pickup_for_shipment(&self, id: ShipmentId) -> Result<Option<Pickup>> {
        self.find_one("id", id.as_uuid()).await
    }

    async fn pending_compensations(&self) -> Result<Vec<CompensationTask>> {
        let rows = sqlx::query(
            "SELECT version, state FROM compensation_tasks WHERE pending ORDER BY updated_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(decode::<CompensationTask>).collect()
    }

    async fn history(&self, entity_id: Uuid) -> Result<Vec<TransitionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, entity_type, entity_id, action, from_status, to_status, reason, recorded_at
            FROM transition_history
            WHERE entity_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TransitionRecord {
                    id: row.try_get("id")?,
                    entity_type: row.try_get("entity_type")?,
                    entity_id: row.try_get("entity_id")?,
                    action: row.try_get("action")?,
                    from_status: row.try_get("from_status")?,
                    to_status: row.try_get("to_status")?,
                    reason: row.try_get("reason")?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO run_leases (name, holder, acquired_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE SET
                holder = EXCLUDED.holder,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE run_leases.expires_at <= EXCLUDED.acquired_at
               OR run_leases.holder = EXCLUDED.holder
            RETURNING name, holder, acquired_at, expires_at
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(now)
        .bind(now + ttl)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Lease {
                name: row.try_get("name")?,
                holder: row.try_get("holder")?,
                acquired_at: row.try_get("acquired_at")?,
                expires_at: row.try_get("expires_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        sqlx::query("DELETE FROM run_leases WHERE name = $1 AND holder = $2")
            .bind(&lease.name)
            .bind(&lease.holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
