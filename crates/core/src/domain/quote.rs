use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::catalog::{ProductId, ServiceId};
use crate::errors::DomainError;
use crate::pricing::PricingBreakdown;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Customer-facing reference, `Q-<YYYYMMDD>-<8 hex>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteNumber(pub String);

impl QuoteNumber {
    pub fn generate(at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("Q-{}-{}", at.format("%Y%m%d"), suffix[..8].to_ascii_uppercase()))
    }
}

impl fmt::Display for QuoteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteItemId(pub String);

impl QuoteItemId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Viewed,
    Accepted,
    Rejected,
    Expired,
}

impl QuoteStatus {
    pub const ALL: [QuoteStatus; 6] = [
        QuoteStatus::Draft,
        QuoteStatus::Sent,
        QuoteStatus::Viewed,
        QuoteStatus::Accepted,
        QuoteStatus::Rejected,
        QuoteStatus::Expired,
    ];

    /// Statuses that still lapse into `expired` once the validity window passes.
    pub const OPEN: [QuoteStatus; 3] =
        [QuoteStatus::Draft, QuoteStatus::Sent, QuoteStatus::Viewed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Expired)
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Status as read at `now`: open statuses lapse into `expired` once the
    /// validity window has closed.
    pub fn effective_at(self, valid_until: DateTime<Utc>, now: DateTime<Utc>) -> QuoteStatus {
        if self.is_open() && valid_until < now {
            QuoteStatus::Expired
        } else {
            self
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "sent" => Ok(Self::Sent),
            "viewed" => Ok(Self::Viewed),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            _ => Err(DomainError::UnknownStatus(value.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleInfo {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<u16>,
    pub license_plate: Option<String>,
}

impl VehicleInfo {
    pub fn is_empty(&self) -> bool {
        self.make.is_none()
            && self.model.is_none()
            && self.year.is_none()
            && self.license_plate.is_none()
    }

    /// "2019 Seat Leon" style label used in notifications.
    pub fn label(&self) -> Option<String> {
        let parts: Vec<String> = [
            self.year.map(|year| year.to_string()),
            self.make.clone(),
            self.model.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteItem {
    pub id: QuoteItemId,
    pub name: String,
    pub description: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub product_id: Option<ProductId>,
    pub service_id: Option<ServiceId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: QuoteId,
    pub quote_number: QuoteNumber,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub status: QuoteStatus,
    pub items: Vec<QuoteItem>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub valid_until: DateTime<Utc>,
    pub vehicle: Option<VehicleInfo>,
    pub notes: Option<String>,
    pub requirements: Vec<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// One recorded status change, persisted alongside the quote for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
    pub quote_id: QuoteId,
    pub from: QuoteStatus,
    pub to: QuoteStatus,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

impl Quote {
    /// Status as it should be displayed and filtered: open quotes whose
    /// validity window has elapsed read as expired even before the sweep
    /// persists it.
    pub fn effective_status(&self, now: DateTime<Utc>) -> QuoteStatus {
        self.status.effective_at(self.valid_until, now)
    }

    /// Staff-settable transition. Any status may be chosen; the lifecycle
    /// timestamp for the target state is stamped only if still unset.
    pub fn apply_status(
        &mut self,
        next: QuoteStatus,
        actor: impl Into<String>,
        at: DateTime<Utc>,
    ) -> StatusTransition {
        let from = self.status;
        self.status = next;
        self.updated_at = at;
        match next {
            QuoteStatus::Sent => {
                self.sent_at.get_or_insert(at);
            }
            QuoteStatus::Viewed => {
                self.viewed_at.get_or_insert(at);
            }
            QuoteStatus::Accepted | QuoteStatus::Rejected => {
                self.responded_at.get_or_insert(at);
            }
            QuoteStatus::Draft | QuoteStatus::Expired => {}
        }

        StatusTransition {
            quote_id: self.id.clone(),
            from,
            to: next,
            actor: actor.into(),
            occurred_at: at,
        }
    }

    /// Send path: only open, unexpired quotes can be (re)sent. A quote the
    /// customer already viewed keeps `viewed`.
    pub fn mark_sent(
        &mut self,
        actor: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<StatusTransition, DomainError> {
        let effective = self.effective_status(at);
        if effective.is_terminal() {
            return Err(DomainError::InvalidQuoteTransition {
                from: effective,
                to: QuoteStatus::Sent,
            });
        }

        let next = match self.status {
            QuoteStatus::Viewed => QuoteStatus::Viewed,
            _ => QuoteStatus::Sent,
        };
        let transition = self.apply_status(next, actor, at);
        self.sent_at.get_or_insert(at);
        Ok(transition)
    }

    /// Customer opened the quote. Returns `None` when nothing changes.
    pub fn mark_viewed(
        &mut self,
        actor: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Option<StatusTransition> {
        if self.effective_status(at) != QuoteStatus::Sent {
            return None;
        }
        Some(self.apply_status(QuoteStatus::Viewed, actor, at))
    }

    /// Customer accepted or rejected. Only allowed while the quote is
    /// outstanding with the customer.
    pub fn record_response(
        &mut self,
        decision: QuoteStatus,
        actor: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<StatusTransition, DomainError> {
        if !matches!(decision, QuoteStatus::Accepted | QuoteStatus::Rejected) {
            return Err(DomainError::validation("decision must be accept or reject"));
        }

        let effective = self.effective_status(at);
        if !matches!(effective, QuoteStatus::Sent | QuoteStatus::Viewed) {
            return Err(DomainError::InvalidQuoteTransition { from: effective, to: decision });
        }
        Ok(self.apply_status(decision, actor, at))
    }

    /// Full replacement of the line items with server-computed totals.
    pub fn replace_items(
        &mut self,
        items: Vec<QuoteItem>,
        pricing: &PricingBreakdown,
        at: DateTime<Utc>,
    ) {
        self.items = items;
        self.apply_pricing(pricing);
        self.updated_at = at;
    }

    pub fn apply_pricing(&mut self, pricing: &PricingBreakdown) {
        self.subtotal = pricing.subtotal;
        self.tax_amount = pricing.tax_amount;
        self.discount_amount = pricing.discount_amount;
        self.total_amount = pricing.total_amount;
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if !self.items.iter().any(|item| !item.name.trim().is_empty()) {
            return Err(DomainError::InvariantViolation(
                "a quote needs at least one named item".to_string(),
            ));
        }
        if self.total_amount != self.subtotal + self.tax_amount - self.discount_amount {
            return Err(DomainError::InvariantViolation(
                "total must equal subtotal + tax - discount".to_string(),
            ));
        }
        for item in &self.items {
            if item.total_price != item.unit_price * Decimal::from(item.quantity) {
                return Err(DomainError::InvariantViolation(format!(
                    "item `{}` total does not match quantity * unit price",
                    item.name
                )));
            }
        }
        Ok(())
    }
}
