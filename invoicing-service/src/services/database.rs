//! Database service for invoicing-service.

use crate::error::InvoicingError;
use crate::models::{
    patch, Company, CreateCompany, CreateInvoice, Invoice, InvoiceDetail, InvoiceItem,
    InvoiceStatus, ListInvoicesFilter, MarkPaid, NewInvoiceItem, UpdateInvoice,
};
use crate::services::metrics::{
    DB_QUERY_DURATION, INVOICES_TOTAL, INVOICE_AMOUNT_TOTAL, PAYMENT_AMOUNT_TOTAL,
};
use crate::services::numbering::{
    ClaimError, InvoiceNumberGenerator, InvoiceSequence, NumberingPolicy,
};
use crate::services::totals::{compute_totals, InvoiceTotals};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Name of the unique constraint on `invoices.invoice_number`.
const INVOICE_NUMBER_CONSTRAINT: &str = "invoices_invoice_number_key";

/// Invoice columns joined with the company name. Expects `invoices i` and
/// `companies c`.
const INVOICE_COLUMNS: &str = r#"
    i.invoice_id, i.company_id, c.name AS company_name, i.invoice_number, i.invoice_date,
    i.due_date, i.recipient, i.recipient_address, i.use_ppn, i.ppn_percentage,
    i.subtotal, i.ppn_amount, i.total, i.status, i.transaction_number, i.paid_at, i.note,
    i.created_utc, i.updated_utc
"#;

/// Shared WHERE clause for listing and summing. Binds $1 status, $2 company,
/// $3 search pattern.
const INVOICE_FILTER: &str = r#"
    ($1::varchar IS NULL OR i.status = $1)
    AND ($2::uuid IS NULL OR i.company_id = $2)
    AND ($3::text IS NULL
        OR i.invoice_number ILIKE $3
        OR c.name ILIKE $3
        OR i.recipient ILIKE $3)
"#;

/// Invoice number sequence stored in `invoice_number_sequences`.
///
/// The upsert takes a row lock on the period, so concurrent callers are
/// serialised and each receives a distinct value. Values are not returned on
/// rollback of the surrounding work; gaps are possible, duplicates are not.
#[derive(Clone)]
pub struct PgInvoiceSequence {
    pool: PgPool,
}

impl PgInvoiceSequence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceSequence for PgInvoiceSequence {
    #[instrument(skip(self))]
    async fn next_value(&self, period: &str) -> Result<u32, InvoicingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["next_invoice_sequence"])
            .start_timer();

        let value: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_number_sequences (period, last_value)
            VALUES ($1, 1)
            ON CONFLICT (period) DO UPDATE
            SET last_value = invoice_number_sequences.last_value + 1,
                updated_utc = NOW()
            RETURNING last_value
            "#,
        )
        .bind(period)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to advance invoice sequence: {}", e))
        })?;

        timer.observe_duration();

        u32::try_from(value).map_err(|_| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Invoice sequence for {} is negative: {}",
                period,
                value
            ))
            .into()
        })
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    numbering: Arc<InvoiceNumberGenerator<PgInvoiceSequence>>,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url, policy), fields(service = "invoicing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        policy: NumberingPolicy,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self::from_pool(pool, policy))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, policy: NumberingPolicy) -> Self {
        let numbering = InvoiceNumberGenerator::new(PgInvoiceSequence::new(pool.clone()), policy);
        Self {
            pool,
            numbering: Arc::new(numbering),
        }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Invoice number generator backed by this database.
    pub fn numbering(&self) -> &InvoiceNumberGenerator<PgInvoiceSequence> {
        &self.numbering
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Company Operations
    // -------------------------------------------------------------------------

    /// Create a company.
    #[instrument(skip(self, input))]
    pub async fn create_company(&self, input: &CreateCompany) -> Result<Company, AppError> {
        input.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_company"])
            .start_timer();

        let company = sqlx::query_as::<_, Company>(
            r#"
            INSERT INTO companies (company_id, name)
            VALUES ($1, $2)
            RETURNING company_id, name, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.name.trim())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create company: {}", e)))?;

        timer.observe_duration();

        info!(company_id = %company.company_id, name = %company.name, "Company created");

        Ok(company)
    }

    /// Get a company by ID.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn get_company(&self, company_id: Uuid) -> Result<Option<Company>, AppError> {
        sqlx::query_as::<_, Company>(
            r#"
            SELECT company_id, name, created_utc
            FROM companies
            WHERE company_id = $1
            "#,
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get company: {}", e)))
    }

    /// List companies by name.
    #[instrument(skip(self))]
    pub async fn list_companies(&self) -> Result<Vec<Company>, AppError> {
        sqlx::query_as::<_, Company>(
            r#"
            SELECT company_id, name, created_utc
            FROM companies
            ORDER BY name, company_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list companies: {}", e)))
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Next invoice number for the current month, for prefilling forms.
    /// Consumes a sequence value.
    pub async fn generate_invoice_number(&self) -> Result<String, AppError> {
        Ok(self.numbering.generate_invoice_number().await?)
    }

    /// Create a draft invoice with its items.
    ///
    /// The number is claimed and the invoice, items and totals are written in
    /// one transaction; if no unique number can be claimed nothing is stored.
    #[instrument(skip(self, input), fields(company_id = %input.company_id))]
    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<InvoiceDetail, AppError> {
        input.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let invoice_date = input
            .invoice_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let totals = compute_totals(&input.items, input.use_ppn, input.ppn_percentage);
        let totals = &totals;

        let detail = self
            .numbering
            .claim(invoice_date, move |number| {
                self.insert_invoice(input, invoice_date, number, totals)
            })
            .await?;

        timer.observe_duration();

        INVOICES_TOTAL
            .with_label_values(&[InvoiceStatus::Draft.as_str()])
            .inc();

        info!(
            invoice_id = %detail.invoice.invoice_id,
            invoice_number = %detail.invoice.invoice_number,
            total = %detail.invoice.total,
            "Draft invoice created"
        );

        Ok(detail)
    }

    async fn insert_invoice(
        &self,
        input: &CreateInvoice,
        invoice_date: NaiveDate,
        invoice_number: String,
        totals: &InvoiceTotals,
    ) -> Result<InvoiceDetail, ClaimError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_id, company_id, invoice_number, invoice_date, due_date,
                recipient, recipient_address, use_ppn, ppn_percentage,
                subtotal, ppn_amount, total, status, note
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'draft', $13)
            "#,
        )
        .bind(invoice_id)
        .bind(input.company_id)
        .bind(&invoice_number)
        .bind(invoice_date)
        .bind(input.due_date)
        .bind(&input.recipient)
        .bind(&input.recipient_address)
        .bind(input.use_ppn)
        .bind(input.ppn_percentage)
        .bind(totals.subtotal)
        .bind(totals.ppn_amount)
        .bind(totals.total)
        .bind(&input.note)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err)
                if db_err.constraint() == Some(INVOICE_NUMBER_CONSTRAINT) =>
            {
                ClaimError::Taken
            }
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                ClaimError::Failed(unknown_company(input.company_id))
            }
            _ => ClaimError::Failed(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to create invoice: {}",
                e
            ))),
        })?;

        insert_items(&mut tx, invoice_id, &input.items).await?;

        let detail = fetch_detail(&mut tx, invoice_id)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Inserted invoice vanished")))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit invoice: {}", e))
        })?;

        Ok(detail)
    }

    /// Get an invoice with its items.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<InvoiceDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;
        let detail = fetch_detail(&mut conn, invoice_id).await?;

        timer.observe_duration();

        Ok(detail)
    }

    /// List invoices matching a filter.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(&self, filter: &ListInvoicesFilter) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let offset = filter.offset.max(0);
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let sql = format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices i
            JOIN companies c ON c.company_id = i.company_id
            WHERE {INVOICE_FILTER}
            ORDER BY {}
            LIMIT $4 OFFSET $5
            "#,
            filter.sort.order_by()
        );

        let invoices = sqlx::query_as::<_, Invoice>(&sql)
            .bind(&status_str)
            .bind(filter.company_id)
            .bind(filter.search_pattern())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Sum of `total` over every invoice matching the filter, ignoring paging.
    #[instrument(skip(self, filter))]
    pub async fn sum_invoice_totals(&self, filter: &ListInvoicesFilter) -> Result<Decimal, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sum_invoice_totals"])
            .start_timer();

        let status_str = filter.status.map(|s| s.as_str().to_string());
        let sql = format!(
            r#"
            SELECT COALESCE(SUM(i.total), 0)
            FROM invoices i
            JOIN companies c ON c.company_id = i.company_id
            WHERE {INVOICE_FILTER}
            "#
        );

        let sum: Decimal = sqlx::query_scalar(&sql)
            .bind(&status_str)
            .bind(filter.company_id)
            .bind(filter.search_pattern())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to sum invoice totals: {}", e))
            })?;

        timer.observe_duration();

        Ok(sum)
    }

    /// Update an invoice. Totals are recomputed from the resulting items and
    /// flags in the same transaction. Paid invoices are locked.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub async fn update_invoice(
        &self,
        invoice_id: Uuid,
        input: &UpdateInvoice,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        input.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let Some(current) = lock_invoice(&mut tx, invoice_id).await? else {
            return Ok(None);
        };
        let status = current.status()?;
        if !status.is_editable() {
            return Err(InvoicingError::InvoiceLocked(current.invoice_number).into());
        }

        if let Some(items) = &input.items {
            sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
                .bind(invoice_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to replace items: {}", e))
                })?;
            insert_items(&mut tx, invoice_id, items).await?;
        }

        let items = fetch_items(&mut tx, invoice_id).await?;
        if status != InvoiceStatus::Draft && items.is_empty() {
            return Err(InvoicingError::NoItems(current.invoice_number).into());
        }
        let use_ppn = input.use_ppn.unwrap_or(current.use_ppn);
        let ppn_percentage = input.ppn_percentage.unwrap_or(current.ppn_percentage);
        let totals = compute_totals(&items, use_ppn, ppn_percentage);
        let company_id = input.company_id.unwrap_or(current.company_id);

        sqlx::query(
            r#"
            UPDATE invoices
            SET company_id = $2,
                invoice_date = $3,
                due_date = $4,
                recipient = $5,
                recipient_address = $6,
                use_ppn = $7,
                ppn_percentage = $8,
                subtotal = $9,
                ppn_amount = $10,
                total = $11,
                note = $12,
                updated_utc = NOW()
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(company_id)
        .bind(input.invoice_date.unwrap_or(current.invoice_date))
        .bind(patch(&input.due_date, &current.due_date))
        .bind(patch(&input.recipient, &current.recipient))
        .bind(patch(&input.recipient_address, &current.recipient_address))
        .bind(use_ppn)
        .bind(ppn_percentage)
        .bind(totals.subtotal)
        .bind(totals.ppn_amount)
        .bind(totals.total)
        .bind(patch(&input.note, &current.note))
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                unknown_company(company_id)
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)),
        })?;

        let detail = fetch_detail(&mut tx, invoice_id).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit invoice update: {}", e))
        })?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, total = %totals.total, "Invoice updated");

        Ok(detail)
    }

    /// Turn PPN on or off for an invoice.
    pub async fn set_use_ppn(
        &self,
        invoice_id: Uuid,
        use_ppn: bool,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        self.update_invoice(
            invoice_id,
            &UpdateInvoice {
                use_ppn: Some(use_ppn),
                ..Default::default()
            },
        )
        .await
    }

    /// Recompute stored totals from the stored items and flags.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn recalculate_totals(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceTotals>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["recalculate_totals"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let Some(current) = lock_invoice(&mut tx, invoice_id).await? else {
            return Ok(None);
        };
        let items = fetch_items(&mut tx, invoice_id).await?;
        let totals = compute_totals(&items, current.use_ppn, current.ppn_percentage);

        if totals != current.totals() {
            sqlx::query(
                r#"
                UPDATE invoices
                SET subtotal = $2, ppn_amount = $3, total = $4, updated_utc = NOW()
                WHERE invoice_id = $1
                "#,
            )
            .bind(invoice_id)
            .bind(totals.subtotal)
            .bind(totals.ppn_amount)
            .bind(totals.total)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to store totals: {}", e))
            })?;

            tracing::warn!(
                invoice_id = %invoice_id,
                stored_total = %current.total,
                total = %totals.total,
                "Stored totals differed from items, corrected"
            );
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit totals: {}", e))
        })?;

        timer.observe_duration();

        Ok(Some(totals))
    }

    /// Issue a draft invoice (draft -> unpaid).
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn issue_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["issue_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let Some(current) = lock_invoice(&mut tx, invoice_id).await? else {
            return Ok(None);
        };
        current.status()?.ensure_transition(InvoiceStatus::Unpaid)?;

        if fetch_items(&mut tx, invoice_id).await?.is_empty() {
            return Err(InvoicingError::NoItems(current.invoice_number).into());
        }

        sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'unpaid', updated_utc = NOW()
            WHERE invoice_id = $1 AND status = 'draft'
            "#,
        )
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to issue invoice: {}", e)))?;

        let invoice = fetch_invoice(&mut tx, invoice_id).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit issue: {}", e))
        })?;

        timer.observe_duration();

        if let Some(ref inv) = invoice {
            INVOICES_TOTAL
                .with_label_values(&[InvoiceStatus::Unpaid.as_str()])
                .inc();
            INVOICE_AMOUNT_TOTAL.inc_by(inv.total.to_f64().unwrap_or_default());
            info!(
                invoice_id = %inv.invoice_id,
                invoice_number = %inv.invoice_number,
                "Invoice issued"
            );
        }

        Ok(invoice)
    }

    /// Mark an unpaid invoice as paid. Transaction number and payment time
    /// are written together with the status.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub async fn mark_paid(
        &self,
        invoice_id: Uuid,
        input: &MarkPaid,
    ) -> Result<Option<Invoice>, AppError> {
        input.validate()?;
        let transaction_number = input.transaction_number.trim();
        if transaction_number.is_empty() {
            return Err(InvoicingError::PaymentDetailsRequired.into());
        }
        let paid_at = input.paid_at.unwrap_or_else(Utc::now);

        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_paid"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let Some(current) = lock_invoice(&mut tx, invoice_id).await? else {
            return Ok(None);
        };
        current.status()?.ensure_transition(InvoiceStatus::Paid)?;

        sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'paid',
                transaction_number = $2,
                paid_at = $3,
                updated_utc = NOW()
            WHERE invoice_id = $1 AND status = 'unpaid'
            "#,
        )
        .bind(invoice_id)
        .bind(transaction_number)
        .bind(paid_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice paid: {}", e))
        })?;

        let invoice = fetch_invoice(&mut tx, invoice_id).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit payment: {}", e))
        })?;

        timer.observe_duration();

        if let Some(ref inv) = invoice {
            INVOICES_TOTAL
                .with_label_values(&[InvoiceStatus::Paid.as_str()])
                .inc();
            PAYMENT_AMOUNT_TOTAL.inc_by(inv.total.to_f64().unwrap_or_default());
            info!(
                invoice_id = %inv.invoice_id,
                transaction_number = %transaction_number,
                "Invoice paid"
            );
        }

        Ok(invoice)
    }

    /// Delete an invoice and its items.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<bool, AppError> {
        Ok(self.delete_invoices(&[invoice_id]).await? > 0)
    }

    /// Delete several invoices and their items. Returns how many were deleted.
    #[instrument(skip(self, invoice_ids), fields(count = invoice_ids.len()))]
    pub async fn delete_invoices(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        if invoice_ids.is_empty() {
            return Ok(0);
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoices"])
            .start_timer();

        let result = sqlx::query("DELETE FROM invoices WHERE invoice_id = ANY($1)")
            .bind(invoice_ids)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoices: {}", e))
            })?;

        timer.observe_duration();

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, "Invoices deleted");
        }

        Ok(deleted)
    }
}

fn unknown_company(company_id: Uuid) -> AppError {
    AppError::BadRequest(anyhow::anyhow!("Company {} does not exist", company_id))
}

async fn insert_items(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    items: &[NewInvoiceItem],
) -> Result<(), AppError> {
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO invoice_items (item_id, invoice_id, title, nominal, quantity, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(item.title.trim())
        .bind(item.nominal)
        .bind(item.quantity)
        .bind(position as i32)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to add invoice item: {}", e)))?;
    }
    Ok(())
}

async fn fetch_items(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
    sqlx::query_as::<_, InvoiceItem>(
        r#"
        SELECT item_id, invoice_id, title, nominal, quantity, sort_order, created_utc
        FROM invoice_items
        WHERE invoice_id = $1
        ORDER BY sort_order, created_utc
        "#,
    )
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice items: {}", e)))
}

async fn fetch_invoice(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
    let sql = format!(
        r#"
        SELECT {INVOICE_COLUMNS}
        FROM invoices i
        JOIN companies c ON c.company_id = i.company_id
        WHERE i.invoice_id = $1
        "#
    );
    sqlx::query_as::<_, Invoice>(&sql)
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))
}

/// Like `fetch_invoice`, holding a row lock until the transaction ends.
async fn lock_invoice(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
    let sql = format!(
        r#"
        SELECT {INVOICE_COLUMNS}
        FROM invoices i
        JOIN companies c ON c.company_id = i.company_id
        WHERE i.invoice_id = $1
        FOR UPDATE OF i
        "#
    );
    sqlx::query_as::<_, Invoice>(&sql)
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))
}

async fn fetch_detail(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<Option<InvoiceDetail>, AppError> {
    let Some(invoice) = fetch_invoice(conn, invoice_id).await? else {
        return Ok(None);
    };
    let items = fetch_items(conn, invoice_id).await?;
    Ok(Some(InvoiceDetail { invoice, items }))
}
