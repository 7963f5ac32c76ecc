use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use tireline_core::domain::quote::{Quote, QuoteId, QuoteNumber, StatusTransition};
use tireline_core::listing::{QuoteFilter, QuotePage, QuoteQuery, QuoteStats};

pub mod memory;
pub mod quote;
#[cfg(test)]
mod test_support;

pub use memory::InMemoryQuoteRepository;
pub use quote::SqlQuoteRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("duplicate quote: {0}")]
    Duplicate(String),
}

/// Storage seam for the quote workflow. Every multi-row write runs in a
/// single transaction; lifecycle timestamps already set in storage are never
/// overwritten.
#[async_trait]
pub trait QuoteRepository: Send + Sync {
    /// Persists a new quote together with its items.
    async fn insert(&self, quote: &Quote) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError>;

    async fn find_by_number(&self, number: &QuoteNumber)
        -> Result<Option<Quote>, RepositoryError>;

    /// One page of quotes plus stats over the whole filtered set.
    async fn list(
        &self,
        query: &QuoteQuery,
        now: DateTime<Utc>,
    ) -> Result<QuotePage, RepositoryError>;

    async fn stats(
        &self,
        filter: &QuoteFilter,
        now: DateTime<Utc>,
    ) -> Result<QuoteStats, RepositoryError>;

    /// Writes `quote`'s status and lifecycle timestamps and appends the
    /// history row. Returns the stored quote, or `None` when it no longer
    /// exists.
    async fn record_transition(
        &self,
        quote: &Quote,
        transition: &StatusTransition,
    ) -> Result<Option<Quote>, RepositoryError>;

    /// Replaces items, totals, notes and requirements. When `transition` is
    /// given, the status change and its history row commit together with
    /// the details. Returns `false` when the quote does not exist.
    async fn update_details(
        &self,
        quote: &Quote,
        transition: Option<&StatusTransition>,
    ) -> Result<bool, RepositoryError>;

    /// Hard delete; items and history cascade.
    async fn delete(&self, id: &QuoteId) -> Result<bool, RepositoryError>;

    /// Moves every stored draft/sent/viewed quote whose validity window
    /// closed before `now` to `expired`.
    async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
        actor: &str,
    ) -> Result<Vec<StatusTransition>, RepositoryError>;

    async fn status_history(&self, id: &QuoteId)
        -> Result<Vec<StatusTransition>, RepositoryError>;
}
