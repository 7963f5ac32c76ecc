//! Validation of inbound quote requests and assembly of the `Quote`
//! aggregate. Monetary totals are always computed here through the pricing
//! engine; the input types deliberately carry no total fields.

use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::catalog::{ProductId, ServiceId};
use crate::domain::quote::{
    Quote, QuoteId, QuoteItem, QuoteItemId, QuoteNumber, QuoteStatus, VehicleInfo,
};
use crate::errors::DomainError;
use crate::pricing::{line_total, money, PricingEngine};

pub const DEFAULT_VALID_DAYS: u32 = 30;
pub const MAX_VALID_DAYS: u32 = 365;
pub const MAX_ITEM_QUANTITY: u32 = 10_000;
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
const MIN_VEHICLE_YEAR: u16 = 1900;

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInput {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub product_id: Option<String>,
    pub service_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuoteInput {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_year: Option<u16>,
    pub license_plate: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub valid_days: Option<u32>,
    pub discount_amount: Option<Decimal>,
    #[serde(default)]
    pub items: Vec<ItemInput>,
    #[serde(default)]
    pub send_immediately: bool,
}

/// Settings the intake needs from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntakeDefaults {
    pub valid_days: u32,
}

impl Default for IntakeDefaults {
    fn default() -> Self {
        Self { valid_days: DEFAULT_VALID_DAYS }
    }
}

impl NewQuoteInput {
    /// Validates the request and builds a draft quote with authoritative
    /// totals. Nothing is persisted here.
    pub fn into_quote(
        self,
        pricing: &dyn PricingEngine,
        defaults: IntakeDefaults,
        created_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Quote, DomainError> {
        let customer_name = required(&self.customer_name, "customer name is required")?;
        let customer_email = required(&self.customer_email, "customer email is required")?;
        validate_email(&customer_email)?;

        let valid_days = self.valid_days.unwrap_or(defaults.valid_days);
        if valid_days == 0 || valid_days > MAX_VALID_DAYS {
            return Err(DomainError::validation(format!(
                "valid days must be between 1 and {MAX_VALID_DAYS}"
            )));
        }

        if let Some(year) = self.vehicle_year {
            let latest = u16::try_from(now.year() + 1).unwrap_or(u16::MAX);
            if !(MIN_VEHICLE_YEAR..=latest).contains(&year) {
                return Err(DomainError::validation(format!(
                    "vehicle year must be between {MIN_VEHICLE_YEAR} and {latest}"
                )));
            }
        }

        let items = build_items(self.items)?;
        let pricing = pricing.price(&items, self.discount_amount.unwrap_or(Decimal::ZERO))?;

        let vehicle = VehicleInfo {
            make: optional(self.vehicle_make),
            model: optional(self.vehicle_model),
            year: self.vehicle_year,
            license_plate: optional(self.license_plate).map(|plate| plate.to_ascii_uppercase()),
        };

        let mut quote = Quote {
            id: QuoteId::generate(),
            quote_number: QuoteNumber::generate(now),
            customer_name,
            customer_email: customer_email.to_ascii_lowercase(),
            customer_phone: optional(self.customer_phone),
            status: QuoteStatus::Draft,
            items,
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            currency: pricing.trace.currency.clone(),
            valid_until: now + Duration::days(i64::from(valid_days)),
            vehicle: (!vehicle.is_empty()).then_some(vehicle),
            notes: optional(self.notes),
            requirements: normalize_requirements(self.requirements),
            created_by,
            created_at: now,
            updated_at: now,
            sent_at: None,
            viewed_at: None,
            responded_at: None,
        };
        quote.apply_pricing(&pricing);
        quote.check_invariants()?;

        Ok(quote)
    }
}

/// Trims names, drops rows whose name is blank, and rejects the list when
/// nothing named remains. Unit prices are normalized to cents so that
/// `total_price == quantity * unit_price` holds exactly.
pub fn build_items(inputs: Vec<ItemInput>) -> Result<Vec<QuoteItem>, DomainError> {
    let mut items = Vec::with_capacity(inputs.len());
    for input in inputs {
        let name = input.name.trim();
        if name.is_empty() {
            continue;
        }
        if input.quantity == 0 {
            return Err(DomainError::validation(format!(
                "item `{name}` must have a quantity of at least 1"
            )));
        }
        if input.unit_price < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "item `{name}` cannot have a negative unit price"
            )));
        }
        if input.quantity > MAX_ITEM_QUANTITY {
            return Err(DomainError::validation(format!(
                "item `{name}` cannot have a quantity above {MAX_ITEM_QUANTITY}"
            )));
        }
        if input.unit_price > MAX_UNIT_PRICE {
            return Err(DomainError::validation(format!(
                "item `{name}` cannot have a unit price above {MAX_UNIT_PRICE}"
            )));
        }

        let unit_price = money(input.unit_price);
        items.push(QuoteItem {
            id: QuoteItemId::generate(),
            name: name.to_string(),
            description: optional(input.description),
            quantity: input.quantity,
            unit_price,
            total_price: line_total(input.quantity, unit_price)?,
            product_id: optional(input.product_id).map(ProductId),
            service_id: optional(input.service_id).map(ServiceId),
        });
    }

    if items.is_empty() {
        return Err(DomainError::validation("at least one item with a name is required"));
    }
    Ok(items)
}

pub fn normalize_requirements(requirements: Vec<String>) -> Vec<String> {
    requirements
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

pub fn optional(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn required(value: &str, message: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(message));
    }
    Ok(trimmed.to_string())
}

fn validate_email(email: &str) -> Result<(), DomainError> {
    let shaped = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if shaped {
        Ok(())
    } else {
        Err(DomainError::validation("customer email is not a valid address"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{
        build_items, IntakeDefaults, ItemInput, NewQuoteInput, MAX_ITEM_QUANTITY, MAX_UNIT_PRICE,
    };
    use crate::domain::quote::QuoteStatus;
    use crate::errors::DomainError;
    use crate::pricing::FixedRatePricingEngine;

    fn tire_a() -> ItemInput {
        ItemInput {
            name: "Tire A".to_string(),
            quantity: 4,
            unit_price: Decimal::new(50, 0),
            ..ItemInput::default()
        }
    }

    fn input() -> NewQuoteInput {
        NewQuoteInput {
            customer_name: " Ana Ruiz ".to_string(),
            customer_email: "Ana@Example.com".to_string(),
            vehicle_make: Some("Seat".to_string()),
            vehicle_model: Some("Leon".to_string()),
            vehicle_year: Some(2019),
            license_plate: Some("1234 abc".to_string()),
            items: vec![tire_a()],
            ..NewQuoteInput::default()
        }
    }

    fn build(input: NewQuoteInput) -> Result<crate::domain::quote::Quote, DomainError> {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).single().expect("valid date");
        input.into_quote(
            &FixedRatePricingEngine::default(),
            IntakeDefaults::default(),
            Some("admin:ops".to_string()),
            now,
        )
    }

    #[test]
    fn builds_priced_draft_from_valid_request() {
        let quote = build(input()).expect("valid input");

        assert_eq!(quote.status, QuoteStatus::Draft);
        assert_eq!(quote.customer_name, "Ana Ruiz");
        assert_eq!(quote.customer_email, "ana@example.com");
        assert_eq!(quote.subtotal, Decimal::new(20000, 2));
        assert_eq!(quote.tax_amount, Decimal::new(4200, 2));
        assert_eq!(quote.discount_amount, Decimal::ZERO);
        assert_eq!(quote.total_amount, Decimal::new(24200, 2));
        assert_eq!(quote.items[0].total_price, Decimal::new(20000, 2));
        assert_eq!(quote.valid_until - quote.created_at, Duration::days(30));
        assert_eq!(quote.currency, "EUR");

        let vehicle = quote.vehicle.expect("vehicle snapshot");
        assert_eq!(vehicle.license_plate.as_deref(), Some("1234 ABC"));
        assert_eq!(vehicle.label().as_deref(), Some("2019 Seat Leon"));
    }

    #[test]
    fn rejects_blank_customer_fields() {
        let mut missing_name = input();
        missing_name.customer_name = "   ".to_string();
        assert_eq!(
            build(missing_name),
            Err(DomainError::validation("customer name is required"))
        );

        let mut missing_email = input();
        missing_email.customer_email = String::new();
        assert_eq!(
            build(missing_email),
            Err(DomainError::validation("customer email is required"))
        );

        let mut malformed = input();
        malformed.customer_email = "ana.example.com".to_string();
        assert!(matches!(build(malformed), Err(DomainError::Validation(_))));
    }

    #[test]
    fn rejects_item_lists_without_named_items() {
        let mut blank = input();
        blank.items = vec![ItemInput { name: "  ".to_string(), ..tire_a() }];
        assert_eq!(
            build(blank),
            Err(DomainError::validation("at least one item with a name is required"))
        );

        let mut empty = input();
        empty.items.clear();
        assert!(build(empty).is_err());
    }

    #[test]
    fn blank_rows_are_dropped_and_names_trimmed() {
        let items = build_items(vec![
            ItemInput { name: String::new(), ..tire_a() },
            ItemInput { name: "  Balancing ".to_string(), quantity: 1, ..tire_a() },
        ])
        .expect("one named item");

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Balancing");
    }

    #[test]
    fn rejects_zero_quantity_and_negative_prices() {
        assert!(build_items(vec![ItemInput { quantity: 0, ..tire_a() }]).is_err());
        assert!(build_items(vec![ItemInput { unit_price: Decimal::new(-1, 0), ..tire_a() }])
            .is_err());
    }

    #[test]
    fn rejects_quantities_and_prices_above_the_item_caps() {
        let bulk = build_items(vec![ItemInput { quantity: MAX_ITEM_QUANTITY + 1, ..tire_a() }]);
        assert!(matches!(bulk, Err(DomainError::Validation(_))));

        let pricey = build_items(vec![ItemInput {
            unit_price: Decimal::new(100_000_000_000_000_000, 0),
            quantity: 4_000_000_000,
            ..tire_a()
        }]);
        assert!(matches!(pricey, Err(DomainError::Validation(_))));

        let at_caps = build_items(vec![ItemInput {
            quantity: MAX_ITEM_QUANTITY,
            unit_price: MAX_UNIT_PRICE,
            ..tire_a()
        }])
        .expect("caps are inclusive");
        assert_eq!(at_caps[0].total_price.to_string(), "10000000000.00");
    }

    #[test]
    fn unit_prices_are_normalized_to_cents() {
        let items =
            build_items(vec![ItemInput { unit_price: Decimal::new(10005, 3), ..tire_a() }])
                .expect("valid");

        assert_eq!(items[0].unit_price, Decimal::new(1001, 2));
        assert_eq!(items[0].total_price, Decimal::new(4004, 2));
    }

    #[test]
    fn validity_window_is_bounded() {
        let mut custom = input();
        custom.valid_days = Some(7);
        let quote = build(custom).expect("seven days");
        assert_eq!(quote.valid_until - quote.created_at, Duration::days(7));

        let mut zero = input();
        zero.valid_days = Some(0);
        assert!(build(zero).is_err());

        let mut too_long = input();
        too_long.valid_days = Some(400);
        assert!(build(too_long).is_err());
    }

    #[test]
    fn rejects_implausible_vehicle_year() {
        let mut future = input();
        future.vehicle_year = Some(2035);
        assert!(matches!(build(future), Err(DomainError::Validation(_))));
    }

    #[test]
    fn discount_flows_into_totals() {
        let mut discounted = input();
        discounted.discount_amount = Some(Decimal::new(2000, 2));
        let quote = build(discounted).expect("discount within total");

        assert_eq!(quote.discount_amount, Decimal::new(2000, 2));
        assert_eq!(quote.total_amount, Decimal::new(22200, 2));
    }

    #[test]
    fn client_supplied_totals_are_ignored() {
        let payload = serde_json::json!({
            "customerName": "Ana Ruiz",
            "customerEmail": "ana@example.com",
            "subtotal": 1,
            "totalAmount": 1,
            "items": [{ "name": "Tire A", "quantity": 4, "unitPrice": 50, "totalPrice": 1 }]
        });
        let input: NewQuoteInput = serde_json::from_value(payload).expect("deserialize");
        let quote = build(input).expect("valid");

        assert_eq!(quote.total_amount, Decimal::new(24200, 2));
        assert_eq!(quote.items[0].total_price, Decimal::new(20000, 2));
    }
}
