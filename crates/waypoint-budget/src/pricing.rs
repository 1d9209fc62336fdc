use std::collections::HashMap;

use waypoint_types::PricingSource;

/// Raw usage as reported by a provider call, before cost resolution.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Cost reported directly by the provider, if any.
    pub provider_cost_usd: Option<f64>,
    /// LiteLLM-style passthrough metadata (`usage.raw.response_cost`).
    pub litellm_response_cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct PricingEntry {
    pub prompt_cost_per_1k: f64,
    pub completion_cost_per_1k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownPricingMode {
    Warn,
    Block,
}

#[derive(Debug, Clone, Copy)]
pub struct PricingResolution {
    pub calculated_cost_usd: f64,
    pub pricing_source: PricingSource,
    pub should_block: bool,
}

/// Resolves a dollar cost for a call's usage, in the priority order the
/// spec fixes: provider-reported cost, then LiteLLM passthrough metadata,
/// then a static per-`provider:model` registry, else `unknown` (warn or
/// block per `unknown_pricing_mode`).
#[derive(Clone)]
pub struct PricingResolver {
    registry: HashMap<String, PricingEntry>,
    unknown_pricing_mode: UnknownPricingMode,
}

impl PricingResolver {
    pub fn new(
        registry: HashMap<String, PricingEntry>,
        unknown_pricing_mode: UnknownPricingMode,
    ) -> Self {
        Self {
            registry,
            unknown_pricing_mode,
        }
    }

    pub fn resolve(&self, provider_id: &str, model_id: &str, usage: &Usage) -> PricingResolution {
        if let Some(cost) = usage.provider_cost_usd {
            return PricingResolution {
                calculated_cost_usd: cost,
                pricing_source: PricingSource::Provider,
                should_block: false,
            };
        }
        if let Some(cost) = usage.litellm_response_cost_usd {
            return PricingResolution {
                calculated_cost_usd: cost,
                pricing_source: PricingSource::Litellm,
                should_block: false,
            };
        }
        let key = format!("{provider_id}:{model_id}");
        if let Some(entry) = self.registry.get(&key) {
            let cost = (usage.prompt_tokens as f64 / 1000.0) * entry.prompt_cost_per_1k
                + (usage.completion_tokens as f64 / 1000.0) * entry.completion_cost_per_1k;
            return PricingResolution {
                calculated_cost_usd: round_to_micros(cost),
                pricing_source: PricingSource::Registry,
                should_block: false,
            };
        }
        PricingResolution {
            calculated_cost_usd: 0.0,
            pricing_source: PricingSource::Unknown,
            should_block: self.unknown_pricing_mode == UnknownPricingMode::Block,
        }
    }
}

/// Rounds to 6 decimal digits; the spec calls for fixed-point precision at
/// this scale where exact ledger sums matter.
fn round_to_micros(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
