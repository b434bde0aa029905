use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub priority: u32,
    #[serde(rename = "maxRetries")]
    pub max_retries: u32,
    pub enabled: bool,
}

/// Ordered, immutable provider order built once from configuration.
/// Lower priority value means tried first; equal priorities keep
/// registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPlan {
    providers: Vec<ProviderDescriptor>,
}

impl FallbackPlan {
    pub fn new(mut providers: Vec<ProviderDescriptor>) -> Self {
        // Stable sort keeps registration order for equal priorities.
        providers.sort_by_key(|descriptor| descriptor.priority);
        Self { providers }
    }

    pub fn providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    pub fn enabled(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter().filter(|descriptor| descriptor.enabled)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.iter().all(|descriptor| !descriptor.enabled)
    }
}
