use std::collections::HashMap;

use ao_domain::{ModelPricing, Usage};

/// Maps `(model, usage) -> estimated cost` from a configured
/// `HashMap<String, ModelPricing>`. A model
/// with no configured price estimates to zero rather than failing the turn — cost is purely
/// informational.
#[derive(Debug, Default, Clone)]
pub struct CostCalculator {
    pricing: HashMap<String, ModelPricing>,
}

impl CostCalculator {
    pub fn new(pricing: HashMap<String, ModelPricing>) -> Self {
        CostCalculator { pricing }
    }

    pub fn estimate_cost(&self, model: &str, usage: &Usage) -> f64 {
        self.pricing
            .get(model)
            .map(|p| p.estimate_cost(usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or(0.0)
    }
}

/// Dynamic-dispatch form of the Cost Calculator, so the Turn Engine can hold it behind an `Arc<dyn _>`
/// alongside the Memory Store, Event Bus, and the rest of the ports.
pub trait CostPort: Send + Sync {
    fn estimate_cost(&self, model: &str, usage: &Usage) -> f64;
}

impl CostPort for CostCalculator {
    fn estimate_cost(&self, model: &str, usage: &Usage) -> f64 {
        CostCalculator::estimate_cost(self, model, usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_model_costs_zero() {
        let calc = CostCalculator::new(HashMap::new());
        let usage = Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        };
        assert_eq!(calc.estimate_cost("unknown-model", &usage), 0.0);
    }

    #[test]
    fn configured_model_uses_its_pricing() {
        let mut pricing = HashMap::new();
        pricing.insert(
            "gpt-5".to_string(),
            ModelPricing {
                input_per_1m: 2.0,
                output_per_1m: 8.0,
            },
        );
        let calc = CostCalculator::new(pricing);
        let usage = Usage {
            prompt_tokens: 1_000_000,
            completion_tokens: 1_000_000,
            total_tokens: 2_000_000,
        };
        assert!((calc.estimate_cost("gpt-5", &usage) - 10.0).abs() < 1e-9);
    }
}
