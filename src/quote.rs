//! Provider quotes

use rust_decimal::Decimal;
use serde::Serialize;

/// Price/terms offer returned by the bridge or swap provider.
///
/// Bridge quotes always carry the provider's quote id; swap quotes do not
/// have one and are identified by their route inside `raw_terms`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub external_ref: Option<String>,
    pub priced_amount_out: Decimal,
    pub raw_terms: serde_json::Value,
}
