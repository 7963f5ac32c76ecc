pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod intake;
pub mod listing;
pub mod notify;
pub mod pricing;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use auth::{AuthError, Principal, Role, SessionSigner};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::quote::{
    Quote, QuoteId, QuoteItem, QuoteItemId, QuoteNumber, QuoteStatus, StatusTransition,
    VehicleInfo,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use intake::{IntakeDefaults, ItemInput, NewQuoteInput};
pub use listing::{
    DateRange, PageRequest, QuoteFilter, QuotePage, QuoteQuery, QuoteSort, QuoteStats,
    SortDirection, SortField,
};
pub use notify::{DeliveryReceipt, DispatchError, NotificationDispatcher, OutboundEmail};
pub use pricing::{FixedRatePricingEngine, PricingBreakdown, PricingEngine, PricingPolicy};
