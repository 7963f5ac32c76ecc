//! JSON API.
//!
//! Admin endpoints (bearer session with role `admin`):
//! - `GET    /api/admin/quotes`              list with filters, page and stats
//! - `POST   /api/admin/quotes`              create (optionally send)
//! - `GET    /api/admin/quotes/stats`        stats for the same filters
//! - `GET    /api/admin/quotes/{id}`         one quote
//! - `PUT    /api/admin/quotes/{id}`         partial update
//! - `DELETE /api/admin/quotes/{id}`         hard delete
//! - `GET    /api/admin/quotes/{id}/history` status audit trail
//! - `POST   /api/admin/quotes/{id}/send`    mark sent and e-mail the customer
//!
//! Customer endpoints (quote number plus matching e-mail):
//! - `GET    /api/quotes/{quote_number}?email=`
//! - `POST   /api/quotes/{quote_number}/respond`

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tireline_core::auth::SessionSigner;
use tireline_core::domain::quote::{Quote, QuoteId, QuoteNumber, StatusTransition};
use tireline_core::errors::{ApplicationError, DomainError};
use tireline_core::intake::NewQuoteInput;
use tireline_core::listing::{
    DateRange, PageRequest, QuoteFilter, QuotePage, QuoteQuery, QuoteSort, QuoteStats,
};

use crate::api::{assign_correlation_id, ApiError, ApiJson, ApiQuery, CorrelationId, ErrorBody};
use crate::auth::AdminSession;
use crate::service::{
    CustomerDecision, NotificationOutcome, QuoteService, QuoteUpdate, RequestContext,
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QuoteService>,
    pub signer: Arc<SessionSigner>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/quotes", get(list_quotes).post(create_quote))
        .route("/api/admin/quotes/stats", get(quote_stats))
        .route("/api/admin/quotes/{id}", get(get_quote).put(update_quote).delete(delete_quote))
        .route("/api/admin/quotes/{id}/history", get(quote_history))
        .route("/api/admin/quotes/{id}/send", post(send_quote))
        .route("/api/quotes/{quote_number}", get(view_quote))
        .route("/api/quotes/{quote_number}/respond", post(respond_to_quote))
        .with_state(state)
        .layer(middleware::from_fn(assign_correlation_id))
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub search: Option<String>,
    pub status: Option<String>,
    pub date_range: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListParams {
    /// `dateRange` and `from` both bound creation from below; the later wins.
    pub fn filter(&self, now: DateTime<Utc>) -> Result<QuoteFilter, DomainError> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) if value.eq_ignore_ascii_case("all") => None,
            Some(value) => Some(value.parse()?),
        };
        let range_start = match self.date_range.as_deref() {
            Some(range) => range.parse::<DateRange>()?.lower_bound(now),
            None => None,
        };
        let from = parse_bound(self.from.as_deref(), "from")?;
        let created_from = match (range_start, from) {
            (Some(range_start), Some(from)) => Some(range_start.max(from)),
            (range_start, from) => range_start.or(from),
        };

        Ok(QuoteFilter {
            search: self.search.clone(),
            status,
            created_from,
            created_to: parse_bound(self.to.as_deref(), "to")?,
        })
    }

    pub fn query(&self, now: DateTime<Utc>) -> Result<QuoteQuery, DomainError> {
        Ok(QuoteQuery {
            filter: self.filter(now)?,
            sort: QuoteSort {
                field: self.sort_by.as_deref().unwrap_or_default().parse()?,
                direction: self.sort_order.as_deref().unwrap_or_default().parse()?,
            },
            page: PageRequest::new(self.page, self.page_size),
        })
    }
}

fn parse_bound(value: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>, DomainError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|bound| Some(bound.with_timezone(&Utc)))
            .map_err(|_| DomainError::validation(format!("`{name}` must be an RFC 3339 timestamp"))),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct QuoteListResponse {
    pub quotes: Vec<Quote>,
    pub pagination: Pagination,
    pub stats: QuoteStats,
}

impl From<QuotePage> for QuoteListResponse {
    fn from(page: QuotePage) -> Self {
        let pagination = Pagination {
            page: page.page.page,
            page_size: page.page.page_size,
            total: page.total,
            total_pages: page.total_pages(),
        };
        Self { quotes: page.quotes, pagination, stats: page.stats }
    }
}

#[derive(Debug, Serialize)]
pub struct QuoteEnvelope {
    pub quote: Quote,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationOutcome>,
}

/// 502 body for a send whose status change committed but whose e-mail did
/// not go out.
#[derive(Debug, Serialize)]
struct NotificationFailureBody {
    #[serde(flatten)]
    error: ErrorBody,
    quote: Quote,
    notification: NotificationOutcome,
}

#[derive(Debug, Deserialize)]
pub struct CustomerLookup {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CustomerResponse {
    pub email: String,
    pub decision: CustomerDecision,
}

fn customer_context(correlation_id: CorrelationId, email: &str) -> RequestContext {
    RequestContext::new(correlation_id.0, format!("customer:{}", email.trim().to_ascii_lowercase()))
}

// ---------------------------------------------------------------------------
// Admin handlers
// ---------------------------------------------------------------------------

async fn list_quotes(
    State(state): State<AppState>,
    session: AdminSession,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<QuoteListResponse>, ApiError> {
    let fail = |error: ApplicationError| ApiError::from_application(error, &session.correlation_id);
    let query = params.query(state.service.now()).map_err(|error| fail(error.into()))?;
    let page = state.service.list(&query).await.map_err(fail)?;
    Ok(Json(page.into()))
}

async fn quote_stats(
    State(state): State<AppState>,
    session: AdminSession,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<QuoteStats>, ApiError> {
    let fail = |error: ApplicationError| ApiError::from_application(error, &session.correlation_id);
    let filter = params.filter(state.service.now()).map_err(|error| fail(error.into()))?;
    let stats = state.service.stats(&filter).await.map_err(fail)?;
    Ok(Json(stats))
}

async fn create_quote(
    State(state): State<AppState>,
    session: AdminSession,
    ApiJson(input): ApiJson<NewQuoteInput>,
) -> Result<(StatusCode, Json<QuoteEnvelope>), ApiError> {
    let outcome = state
        .service
        .create(&session.context(), input)
        .await
        .map_err(|error| ApiError::from_application(error, &session.correlation_id))?;
    Ok((
        StatusCode::CREATED,
        Json(QuoteEnvelope { quote: outcome.quote, notification: outcome.notification }),
    ))
}

async fn get_quote(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<String>,
) -> Result<Json<Quote>, ApiError> {
    let quote = state
        .service
        .get(&QuoteId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &session.correlation_id))?;
    Ok(Json(quote))
}

async fn quote_history(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<String>,
) -> Result<Json<Vec<StatusTransition>>, ApiError> {
    let history = state
        .service
        .history(&QuoteId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &session.correlation_id))?;
    Ok(Json(history))
}

async fn update_quote(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<QuoteUpdate>,
) -> Result<Json<Quote>, ApiError> {
    let quote = state
        .service
        .update(&session.context(), &QuoteId(id), update)
        .await
        .map_err(|error| ApiError::from_application(error, &session.correlation_id))?;
    Ok(Json(quote))
}

async fn send_quote(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = state
        .service
        .send(&session.context(), &QuoteId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &session.correlation_id))?;

    if let NotificationOutcome::Failed { error, .. } = &outcome.notification {
        let failure = ApiError::from_application(
            ApplicationError::Notification(error.clone()),
            &session.correlation_id,
        );
        let body = NotificationFailureBody {
            error: failure.body(),
            quote: outcome.quote,
            notification: outcome.notification,
        };
        return Ok((StatusCode::BAD_GATEWAY, Json(body)).into_response());
    }

    let envelope = QuoteEnvelope { quote: outcome.quote, notification: Some(outcome.notification) };
    Ok(Json(envelope).into_response())
}

async fn delete_quote(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .delete(&session.context(), &QuoteId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &session.correlation_id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Customer handlers
// ---------------------------------------------------------------------------

async fn view_quote(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Path(quote_number): Path<String>,
    ApiQuery(lookup): ApiQuery<CustomerLookup>,
) -> Result<Json<Quote>, ApiError> {
    let ctx = customer_context(correlation_id, &lookup.email);
    let quote = state
        .service
        .view_as_customer(&ctx, &QuoteNumber(quote_number), &lookup.email)
        .await
        .map_err(|error| ApiError::from_application(error, &ctx.correlation_id))?;
    Ok(Json(quote))
}

async fn respond_to_quote(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Path(quote_number): Path<String>,
    ApiJson(response): ApiJson<CustomerResponse>,
) -> Result<Json<Quote>, ApiError> {
    let ctx = customer_context(correlation_id, &response.email);
    let quote = state
        .service
        .respond_as_customer(&ctx, &QuoteNumber(quote_number), &response.email, response.decision)
        .await
        .map_err(|error| ApiError::from_application(error, &ctx.correlation_id))?;
    Ok(Json(quote))
}
