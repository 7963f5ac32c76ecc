use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::quote::QuoteItem;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTraceStep {
    pub stage: String,
    pub detail: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTrace {
    pub currency: String,
    pub steps: Vec<PricingTraceStep>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub trace: PricingTrace,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
    pub currency: String,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self { tax_rate: Decimal::new(21, 2), currency: "EUR".to_string() }
    }
}

pub trait PricingEngine: Send + Sync {
    fn currency(&self) -> &str;

    fn price(
        &self,
        items: &[QuoteItem],
        discount: Decimal,
    ) -> Result<PricingBreakdown, DomainError>;
}

/// Single fixed business tax rate applied to the whole subtotal.
#[derive(Clone, Debug, Default)]
pub struct FixedRatePricingEngine {
    policy: PricingPolicy,
}

impl FixedRatePricingEngine {
    pub fn new(policy: PricingPolicy) -> Self {
        Self { policy }
    }
}

impl PricingEngine for FixedRatePricingEngine {
    fn currency(&self) -> &str {
        &self.policy.currency
    }

    fn price(
        &self,
        items: &[QuoteItem],
        discount: Decimal,
    ) -> Result<PricingBreakdown, DomainError> {
        price_items(items, discount, &self.policy)
    }
}

/// Rounds to cents, half away from zero, and pins the scale to two places so
/// `200` serializes as `200.00`.
pub fn money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

fn out_of_range() -> DomainError {
    DomainError::validation("quote amount is out of range")
}

pub fn line_total(quantity: u32, unit_price: Decimal) -> Result<Decimal, DomainError> {
    unit_price.checked_mul(Decimal::from(quantity)).ok_or_else(out_of_range)
}

pub fn price_items(
    items: &[QuoteItem],
    discount: Decimal,
    policy: &PricingPolicy,
) -> Result<PricingBreakdown, DomainError> {
    if discount < Decimal::ZERO {
        return Err(DomainError::validation("discount amount cannot be negative"));
    }

    let subtotal = money(items.iter().try_fold(Decimal::ZERO, |sum, item| {
        line_total(item.quantity, item.unit_price)?.checked_add(sum).ok_or_else(out_of_range)
    })?);
    let tax_amount = money(subtotal.checked_mul(policy.tax_rate).ok_or_else(out_of_range)?);
    let gross = subtotal.checked_add(tax_amount).ok_or_else(out_of_range)?;
    let discount_amount = money(discount);
    if discount_amount > gross {
        return Err(DomainError::validation("discount amount cannot exceed the quote total"));
    }
    let total_amount = gross - discount_amount;

    Ok(PricingBreakdown {
        subtotal,
        tax_amount,
        discount_amount,
        total_amount,
        trace: PricingTrace {
            currency: policy.currency.clone(),
            steps: vec![
                PricingTraceStep {
                    stage: "subtotal".to_string(),
                    detail: "sum(unit_price * quantity)".to_string(),
                    amount: subtotal,
                },
                PricingTraceStep {
                    stage: "tax".to_string(),
                    detail: format!("subtotal * {}", policy.tax_rate),
                    amount: tax_amount,
                },
                PricingTraceStep {
                    stage: "discount".to_string(),
                    detail: "flat amount".to_string(),
                    amount: discount_amount,
                },
                PricingTraceStep {
                    stage: "total".to_string(),
                    detail: "subtotal + tax - discount".to_string(),
                    amount: total_amount,
                },
            ],
        },
    })
}
