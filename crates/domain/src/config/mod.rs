mod agents;
mod pricing;

pub use agents::AgentConfig;
pub use pricing::ModelPricing;
