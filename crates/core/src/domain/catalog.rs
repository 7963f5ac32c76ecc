use serde::{Deserialize, Serialize};

/// Weak reference to a storefront product. Lookup only; the product may
/// change or disappear without affecting quotes that mention it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

/// Weak reference to a bookable workshop service (fitting, alignment, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub String);
