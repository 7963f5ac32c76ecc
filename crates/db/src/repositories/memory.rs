use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use tireline_core::domain::quote::{Quote, QuoteId, QuoteNumber, QuoteStatus, StatusTransition};
use tireline_core::listing::{QuoteFilter, QuotePage, QuoteQuery, QuoteStats};

use super::{QuoteRepository, RepositoryError};

#[derive(Default)]
struct Store {
    quotes: HashMap<String, Quote>,
    history: Vec<StatusTransition>,
}

/// Process-local store with the same observable behaviour as the SQL one.
#[derive(Default)]
pub struct InMemoryQuoteRepository {
    store: RwLock<Store>,
}

impl InMemoryQuoteRepository {
    fn filtered<'a>(
        store: &'a Store,
        filter: &'a QuoteFilter,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a Quote> + 'a {
        store.quotes.values().filter(move |quote| filter.matches(quote, now))
    }
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn insert(&self, quote: &Quote) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        let taken = store.quotes.contains_key(&quote.id.0)
            || store.quotes.values().any(|existing| existing.quote_number == quote.quote_number);
        if taken {
            return Err(RepositoryError::Duplicate(quote.quote_number.0.clone()));
        }
        store.quotes.insert(quote.id.0.clone(), quote.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.quotes.get(&id.0).cloned())
    }

    async fn find_by_number(
        &self,
        number: &QuoteNumber,
    ) -> Result<Option<Quote>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.quotes.values().find(|quote| &quote.quote_number == number).cloned())
    }

    async fn list(
        &self,
        query: &QuoteQuery,
        now: DateTime<Utc>,
    ) -> Result<QuotePage, RepositoryError> {
        let store = self.store.read().await;
        let mut matching: Vec<&Quote> = Self::filtered(&store, &query.filter, now).collect();
        let stats = QuoteStats::collect(
            matching.iter().map(|quote| (quote.effective_status(now), quote.total_amount)),
        );
        matching.sort_by(|left, right| query.sort.compare(left, right, now));

        let offset = usize::try_from(query.page.offset()).unwrap_or(usize::MAX);
        let quotes = matching
            .into_iter()
            .skip(offset)
            .take(query.page.page_size as usize)
            .cloned()
            .collect();

        Ok(QuotePage { quotes, total: stats.total_quotes, page: query.page, stats })
    }

    async fn stats(
        &self,
        filter: &QuoteFilter,
        now: DateTime<Utc>,
    ) -> Result<QuoteStats, RepositoryError> {
        let store = self.store.read().await;
        Ok(QuoteStats::collect(
            Self::filtered(&store, filter, now)
                .map(|quote| (quote.effective_status(now), quote.total_amount)),
        ))
    }

    async fn record_transition(
        &self,
        quote: &Quote,
        transition: &StatusTransition,
    ) -> Result<Option<Quote>, RepositoryError> {
        let mut store = self.store.write().await;
        let Some(stored) = store.quotes.get_mut(&quote.id.0) else {
            return Ok(None);
        };

        write_status(stored, quote);
        let updated = stored.clone();

        store.history.push(transition.clone());
        Ok(Some(updated))
    }

    async fn update_details(
        &self,
        quote: &Quote,
        transition: Option<&StatusTransition>,
    ) -> Result<bool, RepositoryError> {
        let mut store = self.store.write().await;
        let Some(stored) = store.quotes.get_mut(&quote.id.0) else {
            return Ok(false);
        };

        stored.items = quote.items.clone();
        stored.subtotal = quote.subtotal;
        stored.tax_amount = quote.tax_amount;
        stored.discount_amount = quote.discount_amount;
        stored.total_amount = quote.total_amount;
        stored.notes = quote.notes.clone();
        stored.requirements = quote.requirements.clone();
        stored.updated_at = quote.updated_at;
        if let Some(transition) = transition {
            write_status(stored, quote);
            store.history.push(transition.clone());
        }
        Ok(true)
    }

    async fn delete(&self, id: &QuoteId) -> Result<bool, RepositoryError> {
        let mut store = self.store.write().await;
        let removed = store.quotes.remove(&id.0).is_some();
        if removed {
            store.history.retain(|transition| &transition.quote_id != id);
        }
        Ok(removed)
    }

    async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
        actor: &str,
    ) -> Result<Vec<StatusTransition>, RepositoryError> {
        let mut store = self.store.write().await;
        let mut transitions = Vec::new();

        for quote in store.quotes.values_mut() {
            if quote.status.is_open() && quote.valid_until < now {
                transitions.push(StatusTransition {
                    quote_id: quote.id.clone(),
                    from: quote.status,
                    to: QuoteStatus::Expired,
                    actor: actor.to_string(),
                    occurred_at: now,
                });
                quote.status = QuoteStatus::Expired;
                quote.updated_at = now;
            }
        }

        store.history.extend(transitions.iter().cloned());
        Ok(transitions)
    }

    async fn status_history(
        &self,
        id: &QuoteId,
    ) -> Result<Vec<StatusTransition>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.history.iter().filter(|transition| &transition.quote_id == id).cloned().collect())
    }
}

fn write_status(stored: &mut Quote, quote: &Quote) {
    stored.status = quote.status;
    stored.updated_at = quote.updated_at;
    stored.sent_at = stored.sent_at.or(quote.sent_at);
    stored.viewed_at = stored.viewed_at.or(quote.viewed_at);
    stored.responded_at = stored.responded_at.or(quote.responded_at);
}
