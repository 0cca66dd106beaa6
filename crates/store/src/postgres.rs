use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Aggregate, InventoryRecord, LedgerOp, Order, OrderNumber, OrderStatus, PaymentAttempt,
    PaymentStatus, StockKey, StockShortage,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::{
    AttemptId, EventEnvelope, EventId, OrderId, Result, StoreError, Version,
    store::{AttemptUpdate, CheckoutStore, Transition},
};

/// PostgreSQL-backed checkout store.
///
/// Inventory rows are mutated with conditional `UPDATE`s, so concurrent
/// reservations for the same row serialize on its row lock and at most the
/// available number of units can ever be held.
#[derive(Clone)]
pub struct PostgresCheckoutStore {
    pool: PgPool,
}

impl PostgresCheckoutStore {
    /// Creates a new PostgreSQL checkout store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

/// Absent variants are stored as the empty string so the key can be a primary key.
fn variant_param(key: &StockKey) -> &str {
    key.variant_id.as_ref().map(|v| v.as_str()).unwrap_or("")
}

/// A blank variant id would share its row with the bare product.
fn check_key(key: &StockKey) -> Result<()> {
    if key.has_blank_variant() {
        return Err(StoreError::Integrity(format!(
            "blank variant id for product {}",
            key.product_id
        )));
    }
    Ok(())
}

/// Ledger ops in the order their inventory rows are locked.
///
/// Every transaction touches rows in `StockKey` order, so two orders over
/// the same variants wait on each other rather than deadlock.
fn in_lock_order(ops: &[LedgerOp]) -> Vec<&LedgerOp> {
    let mut sorted: Vec<&LedgerOp> = ops.iter().collect();
    sorted.sort_by(|a, b| a.key().cmp(b.key()));
    sorted
}

fn stock_key(product_id: String, variant_id: String) -> StockKey {
    if variant_id.is_empty() {
        StockKey::product(product_id)
    } else {
        StockKey::variant(product_id, variant_id)
    }
}

fn to_db_quantity(qty: u32) -> Result<i32> {
    i32::try_from(qty).map_err(|_| StoreError::Integrity(format!("quantity {qty} out of range")))
}

fn from_db_quantity(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Integrity(format!("negative {column}: {value}")))
}

fn parse_order_status(value: &str) -> Result<OrderStatus> {
    OrderStatus::parse(value)
        .ok_or_else(|| StoreError::Integrity(format!("unknown order status '{value}'")))
}

fn parse_payment_status(value: &str) -> Result<PaymentStatus> {
    PaymentStatus::parse(value)
        .ok_or_else(|| StoreError::Integrity(format!("unknown payment status '{value}'")))
}

fn row_to_inventory(row: PgRow) -> Result<InventoryRecord> {
    Ok(InventoryRecord::from_parts(
        stock_key(row.try_get("product_id")?, row.try_get("variant_id")?),
        from_db_quantity(row.try_get("quantity")?, "quantity")?,
        from_db_quantity(row.try_get("reserved_quantity")?, "reserved_quantity")?,
        from_db_quantity(row.try_get("low_stock_threshold")?, "low_stock_threshold")?,
        row.try_get("updated_at")?,
    ))
}

fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
    Ok(EventEnvelope {
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        event_type: row.try_get("event_type")?,
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        version: Version::new(row.try_get("version")?),
        timestamp: row.try_get("timestamp")?,
        payload: row.try_get("payload")?,
    })
}

fn row_to_attempt(row: PgRow) -> Result<PaymentAttempt> {
    let attempt_number: i32 = row.try_get("attempt_number")?;
    let status: String = row.try_get("status")?;
    Ok(PaymentAttempt {
        id: AttemptId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        attempt_number: from_db_quantity(attempt_number, "attempt_number")?,
        gateway_order_id: row.try_get("gateway_order_id")?,
        gateway_payment_id: row.try_get("gateway_payment_id")?,
        signature: row.try_get("signature")?,
        amount: domain::Money::from_minor(row.try_get("amount")?),
        currency: row.try_get("currency")?,
        status: parse_payment_status(&status)?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const ATTEMPT_COLUMNS: &str = "id, order_id, attempt_number, gateway_order_id, gateway_payment_id, \
     signature, amount, currency, status, failure_reason, created_at, updated_at";

async fn reserve_row(conn: &mut PgConnection, key: &StockKey, qty: u32) -> Result<bool> {
    if qty == 0 {
        return Ok(false);
    }
    let result = sqlx::query(
        r#"
        UPDATE inventory
        SET reserved_quantity = reserved_quantity + $3, updated_at = NOW()
        WHERE product_id = $1 AND variant_id = $2 AND quantity - reserved_quantity >= $3
        "#,
    )
    .bind(key.product_id.as_str())
    .bind(variant_param(key))
    .bind(to_db_quantity(qty)?)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn available_units(conn: &mut PgConnection, key: &StockKey) -> Result<u32> {
    let available: Option<i32> = sqlx::query_scalar(
        "SELECT quantity - reserved_quantity FROM inventory WHERE product_id = $1 AND variant_id = $2",
    )
    .bind(key.product_id.as_str())
    .bind(variant_param(key))
    .fetch_optional(&mut *conn)
    .await?;
    match available {
        Some(units) => from_db_quantity(units, "available"),
        None => Ok(0),
    }
}

async fn release_row(conn: &mut PgConnection, key: &StockKey, qty: u32) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE inventory
        SET reserved_quantity = GREATEST(reserved_quantity - $3, 0), updated_at = NOW()
        WHERE product_id = $1 AND variant_id = $2
        "#,
    )
    .bind(key.product_id.as_str())
    .bind(variant_param(key))
    .bind(to_db_quantity(qty)?)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::UnknownStockKey(key.clone()));
    }
    Ok(())
}

async fn confirm_row(conn: &mut PgConnection, key: &StockKey, qty: u32) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE inventory
        SET quantity = quantity - LEAST($3, reserved_quantity),
            reserved_quantity = reserved_quantity - LEAST($3, reserved_quantity),
            updated_at = NOW()
        WHERE product_id = $1 AND variant_id = $2
        "#,
    )
    .bind(key.product_id.as_str())
    .bind(variant_param(key))
    .bind(to_db_quantity(qty)?)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::UnknownStockKey(key.clone()));
    }
    Ok(())
}

async fn apply_settlement(conn: &mut PgConnection, ops: &[LedgerOp]) -> Result<()> {
    for op in in_lock_order(ops) {
        match op {
            LedgerOp::Release { key, quantity } => release_row(conn, key, *quantity).await?,
            LedgerOp::Confirm { key, quantity } => confirm_row(conn, key, *quantity).await?,
            LedgerOp::Reserve { key, quantity } => {
                if !reserve_row(conn, key, *quantity).await? {
                    let available = available_units(conn, key).await?;
                    return Err(StoreError::InsufficientStock(vec![StockShortage {
                        key: key.clone(),
                        requested: *quantity,
                        available,
                    }]));
                }
            }
        }
    }
    Ok(())
}

async fn insert_events(
    conn: &mut PgConnection,
    order_id: OrderId,
    envelopes: &[EventEnvelope],
) -> Result<()> {
    for event in envelopes {
        sqlx::query(
            r#"
            INSERT INTO order_events (id, order_id, event_type, version, timestamp, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.event_id.as_uuid())
        .bind(order_id.as_uuid())
        .bind(&event.event_type)
        .bind(event.version.as_i64())
        .bind(event.timestamp)
        .bind(&event.payload)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("unique_order_version") {
                    return StoreError::ConcurrencyConflict {
                        order_id,
                        expected: event.version,
                        actual: event.version,
                    };
                }
            }
            StoreError::Database(e)
        })?;
    }
    Ok(())
}

async fn write_attempt_update(conn: &mut PgConnection, update: &AttemptUpdate) -> Result<()> {
    let attempt = &update.attempt;
    let result = sqlx::query(
        r#"
        UPDATE payment_attempts
        SET gateway_payment_id = $2, signature = $3, status = $4, failure_reason = $5, updated_at = $6
        WHERE id = $1 AND status = $7
        "#,
    )
    .bind(attempt.id.as_uuid())
    .bind(&attempt.gateway_payment_id)
    .bind(&attempt.signature)
    .bind(attempt.status.as_str())
    .bind(&attempt.failure_reason)
    .bind(attempt.updated_at)
    .bind(update.expected_status.as_str())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::AttemptConflict(attempt.id));
    }
    Ok(())
}

fn order_id_of(transition: &Transition) -> Result<OrderId> {
    transition
        .order_id()
        .ok_or_else(|| StoreError::Integrity("transition carries an unplaced order".to_string()))
}

#[async_trait]
impl CheckoutStore for PostgresCheckoutStore {
    async fn reserve(&self, key: &StockKey, qty: u32) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        reserve_row(&mut conn, key, qty).await
    }

    async fn release(&self, key: &StockKey, qty: u32) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        release_row(&mut conn, key, qty).await
    }

    async fn confirm(&self, key: &StockKey, qty: u32) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        confirm_row(&mut conn, key, qty).await
    }

    async fn inventory(&self, key: &StockKey) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, variant_id, quantity, reserved_quantity, low_stock_threshold, updated_at
            FROM inventory
            WHERE product_id = $1 AND variant_id = $2
            "#,
        )
        .bind(key.product_id.as_str())
        .bind(variant_param(key))
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_inventory).transpose()
    }

    async fn upsert_inventory(&self, record: InventoryRecord) -> Result<()> {
        check_key(&record.key)?;
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, variant_id, quantity, reserved_quantity, low_stock_threshold, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (product_id, variant_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                reserved_quantity = EXCLUDED.reserved_quantity,
                low_stock_threshold = EXCLUDED.low_stock_threshold,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.key.product_id.as_str())
        .bind(variant_param(&record.key))
        .bind(to_db_quantity(record.quantity())?)
        .bind(to_db_quantity(record.reserved_quantity())?)
        .bind(to_db_quantity(record.low_stock_threshold)?)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_order(&self, transition: Transition) -> Result<Version> {
        let order_id = order_id_of(&transition)?;
        let order = &transition.order;
        let number = order
            .number()
            .ok_or_else(|| StoreError::Integrity("placed order has no number".to_string()))?;
        let customer_id = order
            .customer_id()
            .ok_or_else(|| StoreError::Integrity("placed order has no customer".to_string()))?;
        let envelopes =
            EventEnvelope::sequence(order_id, transition.expected_version, &transition.events)?;

        let mut tx = self.pool.begin().await?;

        // Every line is attempted so the caller gets the full shortage list.
        let mut shortages = Vec::new();
        for op in in_lock_order(&transition.ledger_ops) {
            let LedgerOp::Reserve { key, quantity } = op else {
                continue;
            };
            check_key(key)?;
            if !reserve_row(&mut tx, key, *quantity).await? {
                shortages.push(StockShortage {
                    key: key.clone(),
                    requested: *quantity,
                    available: available_units(&mut tx, key).await?,
                });
            }
        }
        if !shortages.is_empty() {
            tx.rollback().await?;
            return Err(StoreError::InsufficientStock(shortages));
        }

        let totals = order.totals();
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, customer_id, status, payment_status,
                subtotal, discount, tax, shipping, total, discount_code, currency,
                shipping_address, billing_address, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(number.as_str())
        .bind(customer_id.as_uuid())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(totals.subtotal.minor())
        .bind(totals.discount.minor())
        .bind(totals.tax.minor())
        .bind(totals.shipping.minor())
        .bind(totals.total.minor())
        .bind(order.discount_code())
        .bind(order.currency())
        .bind(serde_json::to_value(order.shipping_address())?)
        .bind(serde_json::to_value(order.billing_address())?)
        .bind(order.version().as_i64())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::DuplicateOrder(order_id)
            }
            e => StoreError::Database(e),
        })?;

        for (line_no, line) in order.lines().iter().enumerate() {
            let key = line.key();
            sqlx::query(
                r#"
                INSERT INTO order_line_items (
                    order_id, line_no, product_id, variant_id, product_name, image_url,
                    quantity, unit_price, line_total
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(line_no as i32)
            .bind(line.product_id.as_str())
            .bind(variant_param(&key))
            .bind(&line.product_name)
            .bind(&line.image_url)
            .bind(to_db_quantity(line.quantity)?)
            .bind(line.unit_price.minor())
            .bind(line.line_total.minor())
            .execute(&mut *tx)
            .await?;
        }

        insert_events(&mut tx, order_id, &envelopes).await?;

        tx.commit().await?;
        tracing::debug!(%order_id, order_number = %number, "order persisted");
        Ok(order.version())
    }

    async fn load_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let Some(row) = sqlx::query("SELECT status, payment_status, version FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let status: String = row.try_get("status")?;
        let payment_status: String = row.try_get("payment_status")?;
        let status = parse_order_status(&status)?;
        let payment_status = parse_payment_status(&payment_status)?;
        let version = Version::new(row.try_get("version")?);

        let events = self
            .order_events(order_id)
            .await?
            .iter()
            .map(EventEnvelope::decode)
            .collect::<Result<Vec<_>>>()?;
        let order = Order::replay(events)
            .ok_or_else(|| StoreError::Integrity(format!("order {order_id} has no events")))?;

        if order.version() != version
            || order.status() != status
            || order.payment_status() != payment_status
        {
            return Err(StoreError::Integrity(format!(
                "order {order_id} row disagrees with its event history"
            )));
        }
        Ok(Some(order))
    }

    async fn find_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>> {
        let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM orders WHERE order_number = $1")
            .bind(number.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match id {
            Some(id) => self.load_order(OrderId::from_uuid(id)).await,
            None => Ok(None),
        }
    }

    async fn save_transition(&self, transition: Transition) -> Result<Version> {
        let order_id = order_id_of(&transition)?;
        let order = &transition.order;
        let envelopes =
            EventEnvelope::sequence(order_id, transition.expected_version, &transition.events)?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_status = $3, version = $4, updated_at = $5,
                cancellation_reason = $6, tracking_number = $7, shipped_at = $8, delivered_at = $9
            WHERE id = $1 AND version = $10
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.version().as_i64())
        .bind(order.updated_at())
        .bind(order.cancellation_reason())
        .bind(order.tracking_number())
        .bind(order.shipped_at())
        .bind(order.delivered_at())
        .bind(transition.expected_version.as_i64())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            return match actual {
                Some(actual) => Err(StoreError::ConcurrencyConflict {
                    order_id,
                    expected: transition.expected_version,
                    actual: Version::new(actual),
                }),
                None => Err(StoreError::OrderNotFound(order_id)),
            };
        }

        if let Some(update) = &transition.attempt {
            write_attempt_update(&mut tx, update).await?;
        }
        apply_settlement(&mut tx, &transition.ledger_ops).await?;
        insert_events(&mut tx, order_id, &envelopes).await?;

        tx.commit().await?;
        Ok(order.version())
    }

    async fn order_events(&self, order_id: OrderId) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, event_type, version, timestamp, payload
            FROM order_events
            WHERE order_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn pending_orders_placed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE status = 'pending' AND created_at <= $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(OrderId::from_uuid).collect())
    }

    async fn insert_attempt(&self, attempt: &PaymentAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_attempts (
                id, order_id, attempt_number, gateway_order_id, gateway_payment_id, signature,
                amount, currency, status, failure_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(attempt.id.as_uuid())
        .bind(attempt.order_id.as_uuid())
        .bind(to_db_quantity(attempt.attempt_number)?)
        .bind(&attempt.gateway_order_id)
        .bind(&attempt.gateway_payment_id)
        .bind(&attempt.signature)
        .bind(attempt.amount.minor())
        .bind(&attempt.currency)
        .bind(attempt.status.as_str())
        .bind(&attempt.failure_reason)
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::AttemptConflict(attempt.id)
            }
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                StoreError::OrderNotFound(attempt.order_id)
            }
            e => StoreError::Database(e),
        })?;
        Ok(())
    }

    async fn settle_attempt(&self, update: AttemptUpdate) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        write_attempt_update(&mut conn, &update).await
    }

    async fn load_attempt(&self, attempt_id: AttemptId) -> Result<Option<PaymentAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE id = $1"
        ))
        .bind(attempt_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_attempt).transpose()
    }

    async fn find_attempt_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE gateway_order_id = $1"
        ))
        .bind(gateway_order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_attempt).transpose()
    }

    async fn attempts_for_order(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE order_id = $1 ORDER BY attempt_number ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_attempt).collect()
    }
}
