use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{InvoiceId, LineItemId, MessageId, OutboxEventId, PrintRequestId};
use domain::{
    IdempotencyKey, Invoice, InvoiceStatus, LineItem, Money, PrintRequest, PrintRequestStatus,
    ProductId,
};
use sqlx::postgres::{PgExecutor, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    NewOutboxEvent, OutboxEvent, Result, StoreError,
    store::{BillingStore, UnitOfWork},
};

const INVOICE_COLUMNS: &str = "id, number, customer, status, created_at, closed_at";
const LINE_ITEM_COLUMNS: &str = "id, invoice_id, product_id, quantity, unit_price_cents";
const PRINT_REQUEST_COLUMNS: &str = "id, invoice_id, status, idempotency_key, requested_at, completed_at, error_message, artifact_url";

/// PostgreSQL-backed billing store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
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
}

fn row_to_line_item(row: &PgRow) -> Result<LineItem> {
    Ok(LineItem {
        id: LineItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
        invoice_id: InvoiceId::from_uuid(row.try_get::<Uuid, _>("invoice_id")?),
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        quantity: row.try_get("quantity")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
    })
}

fn row_to_invoice(row: &PgRow, items: Vec<LineItem>) -> Result<Invoice> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<InvoiceStatus>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(Invoice::from_parts(
        InvoiceId::from_uuid(row.try_get::<Uuid, _>("id")?),
        row.try_get("number")?,
        row.try_get("customer")?,
        status,
        items,
        row.try_get("created_at")?,
        row.try_get("closed_at")?,
    ))
}

fn row_to_print_request(row: &PgRow) -> Result<PrintRequest> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<PrintRequestStatus>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let key: String = row.try_get("idempotency_key")?;
    let key = IdempotencyKey::parse(&key).map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(PrintRequest::from_parts(
        PrintRequestId::from_uuid(row.try_get::<Uuid, _>("id")?),
        InvoiceId::from_uuid(row.try_get::<Uuid, _>("invoice_id")?),
        status,
        key,
        row.try_get("requested_at")?,
        row.try_get("completed_at")?,
        row.try_get("error_message")?,
        row.try_get("artifact_url")?,
    ))
}

fn row_to_outbox_event(row: &PgRow) -> Result<OutboxEvent> {
    Ok(OutboxEvent {
        id: OutboxEventId::new(row.try_get("id")?),
        event_type: row.try_get("event_type")?,
        aggregate_id: InvoiceId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
        payload: row.try_get("payload")?,
        occurred_at: row.try_get("occurred_at")?,
        published_at: row.try_get("published_at")?,
    })
}

/// Maps a unique violation onto [`StoreError::DuplicateKey`].
fn map_unique_violation(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::DuplicateKey {
            constraint: db_err.constraint().unwrap_or_default().to_string(),
        };
    }
    StoreError::Database(e)
}

async fn load_items<'e, E: PgExecutor<'e>>(
    executor: E,
    invoice_ids: &[Uuid],
) -> Result<HashMap<InvoiceId, Vec<LineItem>>> {
    let rows = sqlx::query(&format!(
        "SELECT {LINE_ITEM_COLUMNS} FROM line_items WHERE invoice_id = ANY($1) ORDER BY seq ASC"
    ))
    .bind(invoice_ids)
    .fetch_all(executor)
    .await?;

    let mut items: HashMap<InvoiceId, Vec<LineItem>> = HashMap::new();
    for row in &rows {
        let item = row_to_line_item(row)?;
        items.entry(item.invoice_id).or_default().push(item);
    }
    Ok(items)
}

async fn insert_line_item<'e, E: PgExecutor<'e>>(executor: E, item: &LineItem) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO line_items (id, invoice_id, product_id, quantity, unit_price_cents)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(item.id.as_uuid())
    .bind(item.invoice_id.as_uuid())
    .bind(item.product_id.as_str())
    .bind(item.quantity)
    .bind(item.unit_price.cents())
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl BillingStore for PostgresStore {
    type UnitOfWork = PostgresUnitOfWork;

    async fn begin(&self) -> Result<PostgresUnitOfWork> {
        let tx = self.pool.begin().await?;
        Ok(PostgresUnitOfWork { tx })
    }

    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut items = load_items(&self.pool, &[id.as_uuid()]).await?;
        row_to_invoice(&row, items.remove(&id).unwrap_or_default()).map(Some)
    }

    async fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {INVOICE_COLUMNS} FROM invoices
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC, id
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = load_items(&self.pool, &ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| {
                let id = InvoiceId::from_uuid(id);
                row_to_invoice(row, items.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn find_print_request(&self, id: PrintRequestId) -> Result<Option<PrintRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {PRINT_REQUEST_COLUMNS} FROM print_requests WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_print_request).transpose()
    }

    async fn find_print_request_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<PrintRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {PRINT_REQUEST_COLUMNS} FROM print_requests WHERE idempotency_key = $1"
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_print_request).transpose()
    }

    async fn drain_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, payload, occurred_at, published_at
            FROM outbox_events
            WHERE published_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_outbox_event).collect()
    }

    async fn mark_published(&self, id: OutboxEventId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_events SET published_at = $2 WHERE id = $1 AND published_at IS NULL",
        )
        .bind(id.as_i64())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(outbox_id = %id, "outbox event already published or missing");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// A PostgreSQL transaction. Rolled back on drop unless committed.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, number, customer, status, created_at, closed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(invoice.id().as_uuid())
        .bind(invoice.number())
        .bind(invoice.customer())
        .bind(invoice.status().as_str())
        .bind(invoice.created_at())
        .bind(invoice.closed_at())
        .execute(&mut *self.tx)
        .await?;

        for item in invoice.items() {
            insert_line_item(&mut *self.tx, item).await?;
        }
        Ok(())
    }

    async fn lock_invoice(&mut self, id: InvoiceId) -> Result<Option<Invoice>> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut items = load_items(&mut *self.tx, &[id.as_uuid()]).await?;
        row_to_invoice(&row, items.remove(&id).unwrap_or_default()).map(Some)
    }

    async fn save_invoice_status(&mut self, invoice: &Invoice) -> Result<()> {
        sqlx::query("UPDATE invoices SET status = $2, closed_at = $3 WHERE id = $1")
            .bind(invoice.id().as_uuid())
            .bind(invoice.status().as_str())
            .bind(invoice.closed_at())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<()> {
        insert_line_item(&mut *self.tx, item).await
    }

    async fn insert_print_request(&mut self, request: &PrintRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO print_requests
                (id, invoice_id, status, idempotency_key, requested_at, completed_at, error_message, artifact_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(request.id().as_uuid())
        .bind(request.invoice_id().as_uuid())
        .bind(request.status().as_str())
        .bind(request.idempotency_key().as_str())
        .bind(request.requested_at())
        .bind(request.completed_at())
        .bind(request.error_message())
        .bind(request.artifact_url())
        .execute(&mut *self.tx)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn complete_pending_print_requests(
        &mut self,
        invoice_id: InvoiceId,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE print_requests SET status = 'DONE', completed_at = $2
            WHERE invoice_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(invoice_id.as_uuid())
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn fail_pending_print_requests(
        &mut self,
        invoice_id: InvoiceId,
        reason: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE print_requests SET status = 'FAILED', error_message = $2
            WHERE invoice_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(invoice_id.as_uuid())
        .bind(reason)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn attach_artifact(
        &mut self,
        invoice_id: InvoiceId,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE print_requests
            SET status = 'DONE', artifact_url = $2, completed_at = COALESCE(completed_at, $3)
            WHERE invoice_id = $1 AND status <> 'FAILED' AND artifact_url IS NULL
            "#,
        )
        .bind(invoice_id.as_uuid())
        .bind(url)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn append(&mut self, event: NewOutboxEvent) -> Result<OutboxEventId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox_events (event_type, aggregate_id, payload, occurred_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&event.event_type)
        .bind(event.aggregate_id.as_uuid())
        .bind(&event.payload)
        .bind(event.occurred_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(OutboxEventId::new(id))
    }

    async fn is_processed(&mut self, message_id: &MessageId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM processed_messages WHERE message_id = $1)",
        )
        .bind(message_id.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn record_processed(
        &mut self,
        message_id: &MessageId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO processed_messages (message_id, processed_at) VALUES ($1, $2)")
            .bind(message_id.as_str())
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
