use serde::{Deserialize, Serialize};

/// How a `CostEvent`'s `calculatedCostUsd` was derived. Ordered by the
/// priority `PricingResolver` tries them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingSource {
    Provider,
    Litellm,
    Registry,
    Unknown,
}
