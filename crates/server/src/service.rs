//! Quote workflow orchestration: validation and pricing through the core
//! crate, persistence through the repository seam, then audit, logging and
//! the customer notification as side effects.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tireline_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use tireline_core::clock::Clock;
use tireline_core::domain::quote::{Quote, QuoteId, QuoteNumber, QuoteStatus, StatusTransition};
use tireline_core::errors::{ApplicationError, DomainError};
use tireline_core::intake::{
    build_items, normalize_requirements, optional, IntakeDefaults, ItemInput, NewQuoteInput,
};
use tireline_core::listing::{QuoteFilter, QuotePage, QuoteQuery, QuoteStats};
use tireline_core::pricing::PricingEngine;
use tireline_db::repositories::{QuoteRepository, RepositoryError};

use crate::mailer::QuoteMailer;

pub const EXPIRY_SWEEP_ACTOR: &str = "system:expiry-sweep";

const QUOTE_NUMBER_ATTEMPTS: usize = 3;

/// Who is acting and under which correlation id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub correlation_id: String,
    pub actor: String,
}

impl RequestContext {
    pub fn new(correlation_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), actor: actor.into() }
    }

    /// Context for background work that has no inbound request.
    pub fn system(actor: impl Into<String>) -> Self {
        Self::new(format!("sys-{}", Uuid::new_v4()), actor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NotificationOutcome {
    Delivered {
        provider: String,
        #[serde(rename = "messageId")]
        message_id: String,
    },
    Failed {
        provider: String,
        error: String,
    },
}

impl NotificationOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SendOutcome {
    pub quote: Quote,
    pub notification: NotificationOutcome,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateOutcome {
    pub quote: Quote,
    pub notification: Option<NotificationOutcome>,
}

/// Partial admin update. Absent fields are left untouched; `items` replaces
/// the whole list.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteUpdate {
    pub status: Option<String>,
    pub notes: Option<String>,
    pub requirements: Option<Vec<String>>,
    pub items: Option<Vec<ItemInput>>,
    pub discount_amount: Option<Decimal>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerDecision {
    Accept,
    Reject,
}

impl CustomerDecision {
    fn status(self) -> QuoteStatus {
        match self {
            Self::Accept => QuoteStatus::Accepted,
            Self::Reject => QuoteStatus::Rejected,
        }
    }
}

pub struct QuoteService {
    repository: Arc<dyn QuoteRepository>,
    pricing: Arc<dyn PricingEngine>,
    mailer: QuoteMailer,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    defaults: IntakeDefaults,
}

impl QuoteService {
    pub fn new(
        repository: Arc<dyn QuoteRepository>,
        pricing: Arc<dyn PricingEngine>,
        mailer: QuoteMailer,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        defaults: IntakeDefaults,
    ) -> Self {
        Self { repository, pricing, mailer, audit, clock, defaults }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: NewQuoteInput,
    ) -> Result<CreateOutcome, ApplicationError> {
        let now = self.clock.now();
        let send_immediately = input.send_immediately;

        let mut quote = match input.into_quote(
            self.pricing.as_ref(),
            self.defaults,
            Some(ctx.actor.clone()),
            now,
        ) {
            Ok(quote) => quote,
            Err(rejection) => {
                warn!(
                    event_name = "quote.creation_rejected",
                    correlation_id = %ctx.correlation_id,
                    actor = %ctx.actor,
                    reason = %rejection,
                    "quote request rejected"
                );
                self.audit.emit(
                    AuditEvent::new(
                        None,
                        &ctx.correlation_id,
                        "quote.creation_rejected",
                        AuditCategory::Intake,
                        &ctx.actor,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("reason", rejection.to_string()),
                );
                return Err(rejection.into());
            }
        };

        self.insert_with_fresh_number(&mut quote, now).await?;
        info!(
            event_name = "quote.created",
            correlation_id = %ctx.correlation_id,
            quote_id = %quote.id,
            quote_number = %quote.quote_number,
            actor = %ctx.actor,
            total_amount = %quote.total_amount,
            "quote created"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(quote.id.clone()),
                &ctx.correlation_id,
                "quote.created",
                AuditCategory::Intake,
                &ctx.actor,
                AuditOutcome::Success,
            )
            .with_metadata("quote_number", quote.quote_number.0.clone())
            .with_metadata("total_amount", quote.total_amount.to_string()),
        );

        if !send_immediately {
            return Ok(CreateOutcome { quote, notification: None });
        }
        let sent = self.deliver(ctx, quote).await?;
        Ok(CreateOutcome { quote: sent.quote, notification: Some(sent.notification) })
    }

    pub async fn list(&self, query: &QuoteQuery) -> Result<QuotePage, ApplicationError> {
        let now = self.clock.now();
        let mut page = self.repository.list(query, now).await.map_err(repository_error)?;
        page.quotes = page.quotes.into_iter().map(|quote| present(quote, now)).collect();
        Ok(page)
    }

    pub async fn stats(&self, filter: &QuoteFilter) -> Result<QuoteStats, ApplicationError> {
        self.repository.stats(filter, self.clock.now()).await.map_err(repository_error)
    }

    pub async fn get(&self, id: &QuoteId) -> Result<Quote, ApplicationError> {
        let quote = self.load(id).await?;
        Ok(present(quote, self.clock.now()))
    }

    pub async fn history(&self, id: &QuoteId) -> Result<Vec<StatusTransition>, ApplicationError> {
        self.load(id).await?;
        self.repository.status_history(id).await.map_err(repository_error)
    }

    /// Everything is validated before the write, and detail edits commit in
    /// the same transaction as a status change, so a rejected or failed
    /// update leaves the stored quote untouched. Setting `status` here never
    /// sends e-mail.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: &QuoteId,
        update: QuoteUpdate,
    ) -> Result<Quote, ApplicationError> {
        let next_status = update.status.as_deref().map(QuoteStatus::from_str).transpose()?;
        let mut quote = self.load(id).await?;
        let now = self.clock.now();
        let mut changed = Vec::new();

        if update.items.is_some() || update.discount_amount.is_some() {
            let items = match update.items {
                Some(inputs) => build_items(inputs)?,
                None => quote.items.clone(),
            };
            let discount = update.discount_amount.unwrap_or(quote.discount_amount);
            let pricing = self.pricing.price(&items, discount)?;
            debug!(
                event_name = "quote.repriced",
                correlation_id = %ctx.correlation_id,
                quote_id = %quote.id,
                trace = ?pricing.trace.steps,
                "quote repriced"
            );
            quote.replace_items(items, &pricing, now);
            changed.push("items");
        }
        if let Some(notes) = update.notes {
            quote.notes = optional(Some(notes));
            changed.push("notes");
        }
        if let Some(requirements) = update.requirements {
            quote.requirements = normalize_requirements(requirements);
            changed.push("requirements");
        }

        if changed.is_empty() {
            if let Some(next) = next_status.filter(|next| *next != quote.status) {
                let transition = quote.apply_status(next, ctx.actor.as_str(), now);
                quote = self.commit_transition(ctx, &quote, &transition).await?;
            }
            return Ok(present(quote, now));
        }

        quote.updated_at = now;
        let transition = next_status
            .filter(|next| *next != quote.status)
            .map(|next| quote.apply_status(next, ctx.actor.as_str(), now));
        quote.check_invariants()?;
        if !self
            .repository
            .update_details(&quote, transition.as_ref())
            .await
            .map_err(repository_error)?
        {
            return Err(not_found(id));
        }

        info!(
            event_name = "quote.updated",
            correlation_id = %ctx.correlation_id,
            quote_id = %quote.id,
            actor = %ctx.actor,
            fields = %changed.join(","),
            "quote details updated"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(quote.id.clone()),
                &ctx.correlation_id,
                "quote.updated",
                AuditCategory::Lifecycle,
                &ctx.actor,
                AuditOutcome::Success,
            )
            .with_metadata("fields", changed.join(","))
            .with_metadata("total_amount", quote.total_amount.to_string()),
        );
        if let Some(transition) = &transition {
            self.announce_transition(ctx, transition);
        }

        Ok(present(quote, now))
    }

    /// Commits the send transition, then notifies the customer. A failed
    /// notification is reported in the outcome; the status stays committed.
    pub async fn send(
        &self,
        ctx: &RequestContext,
        id: &QuoteId,
    ) -> Result<SendOutcome, ApplicationError> {
        let quote = self.load(id).await?;
        self.deliver(ctx, quote).await
    }

    pub async fn delete(&self, ctx: &RequestContext, id: &QuoteId) -> Result<(), ApplicationError> {
        if !self.repository.delete(id).await.map_err(repository_error)? {
            return Err(not_found(id));
        }
        info!(
            event_name = "quote.deleted",
            correlation_id = %ctx.correlation_id,
            quote_id = %id,
            actor = %ctx.actor,
            "quote deleted"
        );
        self.audit.emit(AuditEvent::new(
            Some(id.clone()),
            &ctx.correlation_id,
            "quote.deleted",
            AuditCategory::Lifecycle,
            &ctx.actor,
            AuditOutcome::Success,
        ));
        Ok(())
    }

    /// Customer lookup by quote number. Drafts and e-mail mismatches read as
    /// not found; a `sent` quote becomes `viewed`.
    pub async fn view_as_customer(
        &self,
        ctx: &RequestContext,
        number: &QuoteNumber,
        email: &str,
    ) -> Result<Quote, ApplicationError> {
        let mut quote = self.customer_quote(number, email).await?;
        let now = self.clock.now();

        if let Some(transition) = quote.mark_viewed(ctx.actor.as_str(), now) {
            quote = self.commit_transition(ctx, &quote, &transition).await?;
        }
        Ok(present(quote, now))
    }

    pub async fn respond_as_customer(
        &self,
        ctx: &RequestContext,
        number: &QuoteNumber,
        email: &str,
        decision: CustomerDecision,
    ) -> Result<Quote, ApplicationError> {
        let mut quote = self.customer_quote(number, email).await?;
        let now = self.clock.now();

        let transition = quote
            .record_response(decision.status(), ctx.actor.as_str(), now)
            .map_err(|rejection| self.rejected_transition(ctx, &quote, rejection))?;
        let quote = self.commit_transition(ctx, &quote, &transition).await?;
        Ok(present(quote, now))
    }

    /// Persists `expired` for every open quote past its validity window.
    pub async fn expire_overdue(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<StatusTransition>, ApplicationError> {
        let transitions = self
            .repository
            .expire_overdue(self.clock.now(), &ctx.actor)
            .await
            .map_err(repository_error)?;

        for transition in &transitions {
            self.audit.emit(AuditEvent::transition(transition, &ctx.correlation_id));
        }
        if !transitions.is_empty() {
            info!(
                event_name = "quote.expiry_sweep",
                correlation_id = %ctx.correlation_id,
                actor = %ctx.actor,
                expired = transitions.len(),
                "overdue quotes expired"
            );
        }
        Ok(transitions)
    }

    async fn deliver(
        &self,
        ctx: &RequestContext,
        mut quote: Quote,
    ) -> Result<SendOutcome, ApplicationError> {
        let now = self.clock.now();
        let transition = quote
            .mark_sent(ctx.actor.as_str(), now)
            .map_err(|rejection| self.rejected_transition(ctx, &quote, rejection))?;
        let quote = self.commit_transition(ctx, &quote, &transition).await?;

        let provider = self.mailer.provider().to_string();
        let notification = match self.mailer.quote_sent(&quote).await {
            Ok(receipt) => {
                info!(
                    event_name = "quote.notification_sent",
                    correlation_id = %ctx.correlation_id,
                    quote_id = %quote.id,
                    provider = %receipt.provider,
                    message_id = %receipt.message_id,
                    "customer notified"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(quote.id.clone()),
                        &ctx.correlation_id,
                        "quote.notification_sent",
                        AuditCategory::Notification,
                        &ctx.actor,
                        AuditOutcome::Success,
                    )
                    .with_metadata("provider", receipt.provider.clone())
                    .with_metadata("message_id", receipt.message_id.clone()),
                );
                NotificationOutcome::Delivered {
                    provider: receipt.provider,
                    message_id: receipt.message_id,
                }
            }
            Err(failure) => {
                error!(
                    event_name = "quote.notification_failed",
                    correlation_id = %ctx.correlation_id,
                    quote_id = %quote.id,
                    provider = %provider,
                    error = %failure,
                    "customer notification failed after status commit"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(quote.id.clone()),
                        &ctx.correlation_id,
                        "quote.notification_failed",
                        AuditCategory::Notification,
                        &ctx.actor,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("provider", provider.clone())
                    .with_metadata("error", failure.to_string()),
                );
                NotificationOutcome::Failed { provider, error: failure.to_string() }
            }
        };

        Ok(SendOutcome { quote: present(quote, now), notification })
    }

    async fn commit_transition(
        &self,
        ctx: &RequestContext,
        quote: &Quote,
        transition: &StatusTransition,
    ) -> Result<Quote, ApplicationError> {
        let stored = self
            .repository
            .record_transition(quote, transition)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| not_found(&quote.id))?;

        self.announce_transition(ctx, transition);
        Ok(stored)
    }

    fn announce_transition(&self, ctx: &RequestContext, transition: &StatusTransition) {
        info!(
            event_name = "quote.status_changed",
            correlation_id = %ctx.correlation_id,
            quote_id = %transition.quote_id,
            actor = %transition.actor,
            from = %transition.from,
            to = %transition.to,
            "quote status changed"
        );
        self.audit.emit(AuditEvent::transition(transition, &ctx.correlation_id));
    }

    fn rejected_transition(
        &self,
        ctx: &RequestContext,
        quote: &Quote,
        rejection: DomainError,
    ) -> DomainError {
        warn!(
            event_name = "quote.transition_rejected",
            correlation_id = %ctx.correlation_id,
            quote_id = %quote.id,
            actor = %ctx.actor,
            reason = %rejection,
            "quote transition rejected"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(quote.id.clone()),
                &ctx.correlation_id,
                "quote.transition_rejected",
                AuditCategory::Lifecycle,
                &ctx.actor,
                AuditOutcome::Rejected,
            )
            .with_metadata("reason", rejection.to_string()),
        );
        rejection
    }

    async fn load(&self, id: &QuoteId) -> Result<Quote, ApplicationError> {
        self.repository
            .find_by_id(id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| not_found(id))
    }

    async fn customer_quote(
        &self,
        number: &QuoteNumber,
        email: &str,
    ) -> Result<Quote, ApplicationError> {
        let hidden = || ApplicationError::NotFound(format!("quote `{number}`"));
        let quote = self
            .repository
            .find_by_number(number)
            .await
            .map_err(repository_error)?
            .ok_or_else(hidden)?;

        if quote.status == QuoteStatus::Draft
            || !quote.customer_email.eq_ignore_ascii_case(email.trim())
        {
            return Err(hidden());
        }
        Ok(quote)
    }

    /// Retries with a fresh quote number when the generated one collides.
    async fn insert_with_fresh_number(
        &self,
        quote: &mut Quote,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let mut attempt = 1;
        loop {
            match self.repository.insert(quote).await {
                Ok(()) => return Ok(()),
                Err(RepositoryError::Duplicate(number)) if attempt < QUOTE_NUMBER_ATTEMPTS => {
                    warn!(
                        event_name = "quote.number_collision",
                        quote_number = %number,
                        attempt,
                        "regenerating quote number"
                    );
                    quote.quote_number = QuoteNumber::generate(now);
                    attempt += 1;
                }
                Err(error) => return Err(repository_error(error)),
            }
        }
    }
}

/// Reads report the effective status, so lapsed quotes show as expired
/// before the sweep persists it.
fn present(mut quote: Quote, now: DateTime<Utc>) -> Quote {
    quote.status = quote.effective_status(now);
    quote
}

fn not_found(id: &QuoteId) -> ApplicationError {
    ApplicationError::NotFound(format!("quote `{id}`"))
}

fn repository_error(error: RepositoryError) -> ApplicationError {
    match error {
        RepositoryError::Duplicate(number) => {
            ApplicationError::Conflict(format!("quote number `{number}` already exists"))
        }
        other => ApplicationError::Persistence(other.to_string()),
    }
}
