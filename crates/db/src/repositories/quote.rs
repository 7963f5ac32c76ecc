use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use tireline_core::domain::catalog::{ProductId, ServiceId};
use tireline_core::domain::quote::{
    Quote, QuoteId, QuoteItem, QuoteItemId, QuoteNumber, QuoteStatus, StatusTransition,
    VehicleInfo,
};
use tireline_core::listing::{
    QuoteFilter, QuotePage, QuoteQuery, QuoteSort, QuoteStats, SortDirection, SortField,
};

use super::{QuoteRepository, RepositoryError};
use crate::DbPool;

const QUOTE_COLUMNS: &str = "id, quote_number, customer_name, customer_email, customer_phone, \
     status, subtotal, tax_amount, discount_amount, total_amount, currency, valid_until, \
     vehicle_make, vehicle_model, vehicle_year, license_plate, notes, requirements_json, \
     created_by, created_at, updated_at, sent_at, viewed_at, responded_at";

const OPEN_STATUSES_SQL: &str = "('draft', 'sent', 'viewed')";

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, quote_id: &str) -> Result<Vec<QuoteItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, description, quantity, unit_price, total_price, product_id, service_id
             FROM quote_item WHERE quote_id = ? ORDER BY position ASC",
        )
        .bind(quote_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<Quote, RepositoryError> {
        let id: String = column(row, "id")?;
        let items = self.load_items(&id).await?;
        row_to_quote(row, items)
    }

    async fn find_one(
        &self,
        key_column: &'static str,
        value: &str,
    ) -> Result<Option<Quote>, RepositoryError> {
        let sql = format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE {key_column} = ?");
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }
}

/// Fixed-width UTC text so that SQL string comparison is chronological.
fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(name: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

fn decode_money(name: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

fn decode_status(value: &str) -> Result<QuoteStatus, RepositoryError> {
    QuoteStatus::from_str(value).map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

fn timestamp_column(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let value: String = column(row, name)?;
    decode_timestamp(name, &value)
}

fn optional_timestamp_column(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let value: Option<String> = column(row, name)?;
    value.map(|value| decode_timestamp(name, &value)).transpose()
}

fn money_column(row: &SqliteRow, name: &str) -> Result<Decimal, RepositoryError> {
    let value: String = column(row, name)?;
    decode_money(name, &value)
}

fn row_to_item(row: &SqliteRow) -> Result<QuoteItem, RepositoryError> {
    let quantity: i64 = column(row, "quantity")?;
    let quantity = u32::try_from(quantity)
        .map_err(|_| RepositoryError::Decode(format!("quantity out of range: {quantity}")))?;
    let product_id: Option<String> = column(row, "product_id")?;
    let service_id: Option<String> = column(row, "service_id")?;

    Ok(QuoteItem {
        id: QuoteItemId(column(row, "id")?),
        name: column(row, "name")?,
        description: column(row, "description")?,
        quantity,
        unit_price: money_column(row, "unit_price")?,
        total_price: money_column(row, "total_price")?,
        product_id: product_id.map(ProductId),
        service_id: service_id.map(ServiceId),
    })
}

fn row_to_quote(row: &SqliteRow, items: Vec<QuoteItem>) -> Result<Quote, RepositoryError> {
    let status: String = column(row, "status")?;
    let requirements: String = column(row, "requirements_json")?;
    let requirements: Vec<String> = serde_json::from_str(&requirements)
        .map_err(|error| RepositoryError::Decode(format!("requirements_json: {error}")))?;
    let vehicle_year: Option<i64> = column(row, "vehicle_year")?;
    let vehicle_year = vehicle_year
        .map(|year| {
            u16::try_from(year)
                .map_err(|_| RepositoryError::Decode(format!("vehicle_year out of range: {year}")))
        })
        .transpose()?;
    let vehicle = VehicleInfo {
        make: column(row, "vehicle_make")?,
        model: column(row, "vehicle_model")?,
        year: vehicle_year,
        license_plate: column(row, "license_plate")?,
    };

    Ok(Quote {
        id: QuoteId(column(row, "id")?),
        quote_number: QuoteNumber(column(row, "quote_number")?),
        customer_name: column(row, "customer_name")?,
        customer_email: column(row, "customer_email")?,
        customer_phone: column(row, "customer_phone")?,
        status: decode_status(&status)?,
        items,
        subtotal: money_column(row, "subtotal")?,
        tax_amount: money_column(row, "tax_amount")?,
        discount_amount: money_column(row, "discount_amount")?,
        total_amount: money_column(row, "total_amount")?,
        currency: column(row, "currency")?,
        valid_until: timestamp_column(row, "valid_until")?,
        vehicle: (!vehicle.is_empty()).then_some(vehicle),
        notes: column(row, "notes")?,
        requirements,
        created_by: column(row, "created_by")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
        sent_at: optional_timestamp_column(row, "sent_at")?,
        viewed_at: optional_timestamp_column(row, "viewed_at")?,
        responded_at: optional_timestamp_column(row, "responded_at")?,
    })
}

fn row_to_transition(row: &SqliteRow) -> Result<StatusTransition, RepositoryError> {
    let from: String = column(row, "from_status")?;
    let to: String = column(row, "to_status")?;
    Ok(StatusTransition {
        quote_id: QuoteId(column(row, "quote_id")?),
        from: decode_status(&from)?,
        to: decode_status(&to)?,
        actor: column(row, "actor")?,
        occurred_at: timestamp_column(row, "occurred_at")?,
    })
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Appends the WHERE clause. Status predicates match on effective status, so
/// open quotes past `valid_until` count as expired.
fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &QuoteFilter, now: DateTime<Utc>) {
    let now = encode_timestamp(now);
    builder.push(" WHERE 1 = 1");

    if let Some(term) = filter.search_term() {
        let pattern = format!("%{}%", escape_like(&term));
        builder
            .push(" AND (LOWER(customer_name) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR LOWER(customer_email) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR LOWER(quote_number) LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }

    if let Some(status) = filter.status {
        match status {
            QuoteStatus::Expired => {
                builder
                    .push(" AND (status = 'expired' OR (status IN ")
                    .push(OPEN_STATUSES_SQL)
                    .push(" AND valid_until < ")
                    .push_bind(now)
                    .push("))");
            }
            open if open.is_open() => {
                builder
                    .push(" AND status = ")
                    .push_bind(open.as_str())
                    .push(" AND valid_until >= ")
                    .push_bind(now);
            }
            closed => {
                builder.push(" AND status = ").push_bind(closed.as_str());
            }
        }
    }

    if let Some(from) = filter.created_from {
        builder.push(" AND created_at >= ").push_bind(encode_timestamp(from));
    }
    if let Some(to) = filter.created_to {
        builder.push(" AND created_at <= ").push_bind(encode_timestamp(to));
    }
}

/// Appends ORDER BY. Status sorts on the same effective status the filter
/// uses.
fn push_order(builder: &mut QueryBuilder<'_, Sqlite>, sort: QuoteSort, now: DateTime<Utc>) {
    let direction = match sort.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    builder.push(" ORDER BY ");
    match sort.field {
        SortField::CreatedAt => builder.push("created_at"),
        SortField::QuoteNumber => builder.push("quote_number"),
        SortField::CustomerName => builder.push("customer_name COLLATE NOCASE"),
        SortField::TotalAmount => builder.push("CAST(total_amount AS REAL)"),
        SortField::Status => builder
            .push("CASE WHEN status IN ")
            .push(OPEN_STATUSES_SQL)
            .push(" AND valid_until < ")
            .push_bind(encode_timestamp(now))
            .push(" THEN 'expired' ELSE status END"),
        SortField::ValidUntil => builder.push("valid_until"),
    };
    builder.push(format!(" {direction}, quote_number {direction}"));
}

async fn insert_items(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
    items: &[QuoteItem],
) -> Result<(), RepositoryError> {
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO quote_item (id, quote_id, position, name, description, quantity,
                                     unit_price, total_price, product_id, service_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id.0)
        .bind(&quote_id.0)
        .bind(position as i64)
        .bind(&item.name)
        .bind(item.description.as_deref())
        .bind(i64::from(item.quantity))
        .bind(item.unit_price.to_string())
        .bind(item.total_price.to_string())
        .bind(item.product_id.as_ref().map(|id| id.0.as_str()))
        .bind(item.service_id.as_ref().map(|id| id.0.as_str()))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Returns `false` when no row matched `quote.id`.
async fn write_status(
    conn: &mut SqliteConnection,
    quote: &Quote,
) -> Result<bool, RepositoryError> {
    let updated = sqlx::query(
        "UPDATE quote
         SET status = ?,
             updated_at = ?,
             sent_at = COALESCE(sent_at, ?),
             viewed_at = COALESCE(viewed_at, ?),
             responded_at = COALESCE(responded_at, ?)
         WHERE id = ?",
    )
    .bind(quote.status.as_str())
    .bind(encode_timestamp(quote.updated_at))
    .bind(quote.sent_at.map(encode_timestamp))
    .bind(quote.viewed_at.map(encode_timestamp))
    .bind(quote.responded_at.map(encode_timestamp))
    .bind(&quote.id.0)
    .execute(&mut *conn)
    .await?;
    Ok(updated.rows_affected() > 0)
}

async fn insert_transition(
    conn: &mut SqliteConnection,
    transition: &StatusTransition,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO quote_status_event (quote_id, from_status, to_status, actor, occurred_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&transition.quote_id.0)
    .bind(transition.from.as_str())
    .bind(transition.to.as_str())
    .bind(&transition.actor)
    .bind(encode_timestamp(transition.occurred_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn encode_requirements(requirements: &[String]) -> Result<String, RepositoryError> {
    serde_json::to_string(requirements)
        .map_err(|error| RepositoryError::Decode(format!("requirements_json: {error}")))
}

#[async_trait::async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn insert(&self, quote: &Quote) -> Result<(), RepositoryError> {
        let requirements = encode_requirements(&quote.requirements)?;
        let vehicle = quote.vehicle.clone().unwrap_or_default();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO quote ({QUOTE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let inserted = sqlx::query(&sql)
            .bind(&quote.id.0)
            .bind(&quote.quote_number.0)
            .bind(&quote.customer_name)
            .bind(&quote.customer_email)
            .bind(quote.customer_phone.as_deref())
            .bind(quote.status.as_str())
            .bind(quote.subtotal.to_string())
            .bind(quote.tax_amount.to_string())
            .bind(quote.discount_amount.to_string())
            .bind(quote.total_amount.to_string())
            .bind(&quote.currency)
            .bind(encode_timestamp(quote.valid_until))
            .bind(vehicle.make.as_deref())
            .bind(vehicle.model.as_deref())
            .bind(vehicle.year.map(i64::from))
            .bind(vehicle.license_plate.as_deref())
            .bind(quote.notes.as_deref())
            .bind(requirements)
            .bind(quote.created_by.as_deref())
            .bind(encode_timestamp(quote.created_at))
            .bind(encode_timestamp(quote.updated_at))
            .bind(quote.sent_at.map(encode_timestamp))
            .bind(quote.viewed_at.map(encode_timestamp))
            .bind(quote.responded_at.map(encode_timestamp))
            .execute(&mut *tx)
            .await;

        if let Err(sqlx::Error::Database(error)) = &inserted {
            if error.is_unique_violation() {
                return Err(RepositoryError::Duplicate(quote.quote_number.0.clone()));
            }
        }
        inserted?;

        insert_items(&mut tx, &quote.id, &quote.items).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        self.find_one("id", &id.0).await
    }

    async fn find_by_number(
        &self,
        number: &QuoteNumber,
    ) -> Result<Option<Quote>, RepositoryError> {
        self.find_one("quote_number", &number.0).await
    }

    async fn list(
        &self,
        query: &QuoteQuery,
        now: DateTime<Utc>,
    ) -> Result<QuotePage, RepositoryError> {
        let stats = self.stats(&query.filter, now).await?;

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {QUOTE_COLUMNS} FROM quote"));
        push_filter(&mut builder, &query.filter, now);
        push_order(&mut builder, query.sort, now);
        builder
            .push(" LIMIT ")
            .push_bind(i64::from(query.page.page_size))
            .push(" OFFSET ")
            .push_bind(i64::try_from(query.page.offset()).unwrap_or(i64::MAX));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut quotes = Vec::with_capacity(rows.len());
        for row in &rows {
            quotes.push(self.hydrate(row).await?);
        }

        Ok(QuotePage { quotes, total: stats.total_quotes, page: query.page, stats })
    }

    async fn stats(
        &self,
        filter: &QuoteFilter,
        now: DateTime<Utc>,
    ) -> Result<QuoteStats, RepositoryError> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT status, valid_until, total_amount FROM quote");
        push_filter(&mut builder, filter, now);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let entries = rows
            .iter()
            .map(|row| -> Result<_, RepositoryError> {
                let status: String = column(row, "status")?;
                let status = decode_status(&status)?;
                let valid_until = timestamp_column(row, "valid_until")?;
                let total = money_column(row, "total_amount")?;
                Ok((status.effective_at(valid_until, now), total))
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(QuoteStats::collect(entries))
    }

    async fn record_transition(
        &self,
        quote: &Quote,
        transition: &StatusTransition,
    ) -> Result<Option<Quote>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if !write_status(&mut tx, quote).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        insert_transition(&mut tx, transition).await?;
        tx.commit().await?;

        self.find_by_id(&quote.id).await
    }

    async fn update_details(
        &self,
        quote: &Quote,
        transition: Option<&StatusTransition>,
    ) -> Result<bool, RepositoryError> {
        let requirements = encode_requirements(&quote.requirements)?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE quote
             SET subtotal = ?, tax_amount = ?, discount_amount = ?, total_amount = ?,
                 notes = ?, requirements_json = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(quote.subtotal.to_string())
        .bind(quote.tax_amount.to_string())
        .bind(quote.discount_amount.to_string())
        .bind(quote.total_amount.to_string())
        .bind(quote.notes.as_deref())
        .bind(requirements)
        .bind(encode_timestamp(quote.updated_at))
        .bind(&quote.id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM quote_item WHERE quote_id = ?")
            .bind(&quote.id.0)
            .execute(&mut *tx)
            .await?;
        insert_items(&mut tx, &quote.id, &quote.items).await?;
        if let Some(transition) = transition {
            write_status(&mut tx, quote).await?;
            insert_transition(&mut tx, transition).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, id: &QuoteId) -> Result<bool, RepositoryError> {
        let deleted =
            sqlx::query("DELETE FROM quote WHERE id = ?").bind(&id.0).execute(&self.pool).await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
        actor: &str,
    ) -> Result<Vec<StatusTransition>, RepositoryError> {
        let now_text = encode_timestamp(now);
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT id, status FROM quote
             WHERE status IN {OPEN_STATUSES_SQL} AND valid_until < ?
             ORDER BY valid_until ASC"
        );
        let rows = sqlx::query(&sql).bind(&now_text).fetch_all(&mut *tx).await?;

        let mut transitions = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = column(row, "id")?;
            let from: String = column(row, "status")?;

            sqlx::query("UPDATE quote SET status = 'expired', updated_at = ? WHERE id = ?")
                .bind(&now_text)
                .bind(&id)
                .execute(&mut *tx)
                .await?;

            let transition = StatusTransition {
                quote_id: QuoteId(id),
                from: decode_status(&from)?,
                to: QuoteStatus::Expired,
                actor: actor.to_string(),
                occurred_at: now,
            };
            insert_transition(&mut tx, &transition).await?;
            transitions.push(transition);
        }

        tx.commit().await?;
        Ok(transitions)
    }

    async fn status_history(
        &self,
        id: &QuoteId,
    ) -> Result<Vec<StatusTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT quote_id, from_status, to_status, actor, occurred_at
             FROM quote_status_event WHERE quote_id = ? ORDER BY id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transition).collect()
    }
}
