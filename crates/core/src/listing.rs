//! Filtering, sorting, pagination and aggregate statistics for the admin
//! quote list. Status predicates use the effective status, so quotes past
//! their validity window filter and count as `expired`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::quote::{Quote, QuoteStatus};
use crate::errors::DomainError;
use crate::pricing::money;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuoteFilter {
    pub search: Option<String>,
    pub status: Option<QuoteStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl QuoteFilter {
    /// Lower-cased search term, `None` when blank.
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, quote: &Quote, now: DateTime<Utc>) -> bool {
        if let Some(term) = self.search_term() {
            let hit = quote.customer_name.to_lowercase().contains(&term)
                || quote.customer_email.to_lowercase().contains(&term)
                || quote.quote_number.0.to_lowercase().contains(&term);
            if !hit {
                return false;
            }
        }
        if let Some(status) = self.status {
            if quote.effective_status(now) != status {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if quote.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if quote.created_at > to {
                return false;
            }
        }
        true
    }
}

/// Relative creation-date windows offered by the admin list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateRange {
    Today,
    Last7Days,
    Last30Days,
    Last90Days,
    LastYear,
    All,
}

impl DateRange {
    pub fn lower_bound(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Today => now.date_naive().and_hms_opt(0, 0, 0).map(|start| start.and_utc()),
            Self::Last7Days => Some(now - Duration::days(7)),
            Self::Last30Days => Some(now - Duration::days(30)),
            Self::Last90Days => Some(now - Duration::days(90)),
            Self::LastYear => Some(now - Duration::days(365)),
            Self::All => None,
        }
    }
}

impl FromStr for DateRange {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "7d" | "week" => Ok(Self::Last7Days),
            "30d" | "month" => Ok(Self::Last30Days),
            "90d" | "quarter" => Ok(Self::Last90Days),
            "365d" | "year" => Ok(Self::LastYear),
            "" | "all" => Ok(Self::All),
            other => Err(DomainError::validation(format!(
                "unsupported date range `{other}` (expected today|week|month|quarter|year|all)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    CreatedAt,
    QuoteNumber,
    CustomerName,
    TotalAmount,
    Status,
    ValidUntil,
}

impl FromStr for SortField {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().replace(['_', '-'], "").to_ascii_lowercase();
        match normalized.as_str() {
            "" | "createdat" | "date" => Ok(Self::CreatedAt),
            "quotenumber" | "number" => Ok(Self::QuoteNumber),
            "customername" | "customer" => Ok(Self::CustomerName),
            "totalamount" | "total" | "amount" => Ok(Self::TotalAmount),
            "status" => Ok(Self::Status),
            "validuntil" | "expiry" => Ok(Self::ValidUntil),
            _ => Err(DomainError::validation(format!("unsupported sort field `{value}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDirection {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "" | "desc" | "descending" => Ok(Self::Desc),
            other => Err(DomainError::validation(format!(
                "unsupported sort order `{other}` (expected asc|desc)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuoteSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl QuoteSort {
    /// Ordering used by the in-memory store; ties break on quote number so
    /// pages are stable. Status orders by effective status at `now`.
    pub fn compare(&self, left: &Quote, right: &Quote, now: DateTime<Utc>) -> Ordering {
        let ordering = match self.field {
            SortField::CreatedAt => left.created_at.cmp(&right.created_at),
            SortField::QuoteNumber => left.quote_number.0.cmp(&right.quote_number.0),
            SortField::CustomerName => {
                left.customer_name.to_lowercase().cmp(&right.customer_name.to_lowercase())
            }
            SortField::TotalAmount => left.total_amount.cmp(&right.total_amount),
            SortField::Status => {
                left.effective_status(now).as_str().cmp(right.effective_status(now).as_str())
            }
            SortField::ValidUntil => left.valid_until.cmp(&right.valid_until),
        }
        .then_with(|| left.quote_number.0.cmp(&right.quote_number.0));

        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, page_size: DEFAULT_PAGE_SIZE }
    }
}

impl PageRequest {
    /// Clamps out-of-range values instead of rejecting them.
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuoteQuery {
    pub filter: QuoteFilter,
    pub sort: QuoteSort,
    pub page: PageRequest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteStats {
    pub total_quotes: u64,
    pub by_status: BTreeMap<QuoteStatus, u64>,
    pub total_value: Decimal,
    pub average_value: Decimal,
    pub accepted_value: Decimal,
}

impl Default for QuoteStats {
    fn default() -> Self {
        Self::collect(std::iter::empty())
    }
}

impl QuoteStats {
    /// Aggregates `(effective status, total amount)` pairs. Every status is
    /// present in `by_status`, with zero counts where nothing matched.
    pub fn collect(entries: impl IntoIterator<Item = (QuoteStatus, Decimal)>) -> Self {
        let mut by_status: BTreeMap<QuoteStatus, u64> =
            QuoteStatus::ALL.iter().map(|status| (*status, 0)).collect();
        let mut total_quotes = 0_u64;
        let mut total_value = Decimal::ZERO;
        let mut accepted_value = Decimal::ZERO;

        for (status, amount) in entries {
            total_quotes += 1;
            total_value = total_value.saturating_add(amount);
            if status == QuoteStatus::Accepted {
                accepted_value = accepted_value.saturating_add(amount);
            }
            *by_status.entry(status).or_insert(0) += 1;
        }

        let average_value = if total_quotes == 0 {
            Decimal::ZERO
        } else {
            total_value / Decimal::from(total_quotes)
        };

        Self {
            total_quotes,
            by_status,
            total_value: money(total_value),
            average_value: money(average_value),
            accepted_value: money(accepted_value),
        }
    }

    pub fn count(&self, status: QuoteStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuotePage {
    pub quotes: Vec<Quote>,
    pub total: u64,
    pub page: PageRequest,
    pub stats: QuoteStats,
}

impl QuotePage {
    pub fn total_pages(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.total.div_ceil(u64::from(self.page.page_size))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{
        DateRange, PageRequest, QuoteFilter, QuoteSort, QuoteStats, SortDirection, SortField,
    };
    use crate::domain::quote::{Quote, QuoteId, QuoteNumber, QuoteStatus};

    fn quote(number: &str, name: &str, status: QuoteStatus, total: i64) -> Quote {
        let created = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).single().expect("valid date");
        Quote {
            id: QuoteId(number.to_lowercase()),
            quote_number: QuoteNumber(number.to_string()),
            customer_name: name.to_string(),
            customer_email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            customer_phone: None,
            status,
            items: Vec::new(),
            subtotal: Decimal::new(total, 0),
            tax_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            total_amount: Decimal::new(total, 0),
            currency: "EUR".to_string(),
            valid_until: created + Duration::days(30),
            vehicle: None,
            notes: None,
            requirements: Vec::new(),
            created_by: None,
            created_at: created,
            updated_at: created,
            sent_at: None,
            viewed_at: None,
            responded_at: None,
        }
    }

    #[test]
    fn search_and_status_combine_with_and_semantics() {
        let now = Utc.with_ymd_and_hms(2026, 10, 5, 8, 0, 0).single().expect("valid date");
        let filter = QuoteFilter {
            search: Some("ruiz".to_string()),
            status: Some(QuoteStatus::Sent),
            ..QuoteFilter::default()
        };

        assert!(filter.matches(&quote("Q-1", "Ana Ruiz", QuoteStatus::Sent, 100), now));
        assert!(!filter.matches(&quote("Q-2", "Ana Ruiz", QuoteStatus::Draft, 100), now));
        assert!(!filter.matches(&quote("Q-3", "Luis Gil", QuoteStatus::Sent, 100), now));
    }

    #[test]
    fn search_covers_email_and_quote_number() {
        let now = Utc.with_ymd_and_hms(2026, 10, 5, 8, 0, 0).single().expect("valid date");
        let subject = quote("Q-20261001-ABCD0001", "Ana Ruiz", QuoteStatus::Draft, 100);

        let by_number = QuoteFilter { search: Some("abcd0001".to_string()), ..Default::default() };
        let by_email = QuoteFilter { search: Some("ANA.RUIZ@".to_string()), ..Default::default() };
        let blank = QuoteFilter { search: Some("   ".to_string()), ..Default::default() };

        assert!(by_number.matches(&subject, now));
        assert!(by_email.matches(&subject, now));
        assert!(blank.matches(&subject, now));
    }

    #[test]
    fn expired_filter_uses_effective_status() {
        let subject = quote("Q-1", "Ana Ruiz", QuoteStatus::Sent, 100);
        let later = subject.valid_until + Duration::days(1);
        let expired = QuoteFilter { status: Some(QuoteStatus::Expired), ..Default::default() };
        let sent = QuoteFilter { status: Some(QuoteStatus::Sent), ..Default::default() };

        assert!(expired.matches(&subject, later));
        assert!(!sent.matches(&subject, later));
    }

    #[test]
    fn date_ranges_parse_aliases() {
        assert_eq!("week".parse::<DateRange>(), Ok(DateRange::Last7Days));
        assert_eq!("30d".parse::<DateRange>(), Ok(DateRange::Last30Days));
        assert_eq!("".parse::<DateRange>(), Ok(DateRange::All));
        assert!("fortnight".parse::<DateRange>().is_err());

        let now = Utc.with_ymd_and_hms(2026, 10, 18, 15, 30, 0).single().expect("valid date");
        let start = DateRange::Today.lower_bound(now).expect("today has a bound");
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).single().expect("date"));
        assert_eq!(DateRange::All.lower_bound(now), None);
    }

    #[test]
    fn sort_parses_ui_field_names_and_orders() {
        assert_eq!("totalAmount".parse::<SortField>(), Ok(SortField::TotalAmount));
        assert_eq!("customer_name".parse::<SortField>(), Ok(SortField::CustomerName));
        assert!("price".parse::<SortField>().is_err());
        assert_eq!("ASC".parse::<SortDirection>(), Ok(SortDirection::Asc));

        let cheap = quote("Q-1", "Ana Ruiz", QuoteStatus::Draft, 100);
        let pricey = quote("Q-2", "Luis Gil", QuoteStatus::Draft, 900);
        let sort = QuoteSort { field: SortField::TotalAmount, direction: SortDirection::Desc };
        let mut quotes = vec![cheap.clone(), pricey.clone()];
        quotes.sort_by(|a, b| sort.compare(a, b, cheap.created_at));

        assert_eq!(quotes[0].quote_number, pricey.quote_number);
    }

    #[test]
    fn status_sort_uses_effective_status() {
        let lapsed = quote("Q-1", "Ana Ruiz", QuoteStatus::Sent, 100);
        let declined = quote("Q-2", "Luis Gil", QuoteStatus::Rejected, 100);
        let now = lapsed.valid_until + Duration::days(1);
        let sort = QuoteSort { field: SortField::Status, direction: SortDirection::Asc };
        let mut quotes = vec![declined.clone(), lapsed.clone()];
        quotes.sort_by(|a, b| sort.compare(a, b, now));

        // expired < rejected, while stored `sent` would sort last
        assert_eq!(quotes[0].quote_number, lapsed.quote_number);
        assert_eq!(quotes[1].quote_number, declined.quote_number);
    }

    #[test]
    fn page_request_clamps_bounds() {
        assert_eq!(PageRequest::new(Some(0), Some(1000)), PageRequest { page: 1, page_size: 100 });
        assert_eq!(PageRequest::new(Some(3), Some(10)).offset(), 20);
        assert_eq!(PageRequest::new(None, None), PageRequest::default());
    }

    #[test]
    fn stats_count_every_status_and_average_values() {
        let stats = QuoteStats::collect(vec![
            (QuoteStatus::Accepted, Decimal::new(300, 0)),
            (QuoteStatus::Sent, Decimal::new(100, 0)),
            (QuoteStatus::Accepted, Decimal::new(200, 0)),
        ]);

        assert_eq!(stats.total_quotes, 3);
        assert_eq!(stats.count(QuoteStatus::Accepted), 2);
        assert_eq!(stats.count(QuoteStatus::Expired), 0);
        assert_eq!(stats.by_status.len(), 6);
        assert_eq!(stats.total_value, Decimal::new(600, 0));
        assert_eq!(stats.average_value, Decimal::new(200, 0));
        assert_eq!(stats.accepted_value, Decimal::new(500, 0));

        let empty = QuoteStats::default();
        assert_eq!(empty.total_quotes, 0);
        assert_eq!(empty.average_value, Decimal::ZERO);
    }

    #[test]
    fn stats_saturate_instead_of_overflowing() {
        let stats = QuoteStats::collect(vec![
            (QuoteStatus::Accepted, Decimal::MAX),
            (QuoteStatus::Accepted, Decimal::MAX),
        ]);

        assert_eq!(stats.total_quotes, 2);
        assert_eq!(stats.total_value, stats.accepted_value);
        assert!(stats.average_value > Decimal::ZERO);
    }
}
