//! Registry mapping provider names to factories

use super::{DemoCloud, DemoProvider, NativeProvider, Provider};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a fresh provider for one workflow
pub type ProviderFactory = Arc<dyn Fn() -> Box<dyn Provider> + Send + Sync>;

/// Registry that resolves provider names
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `demo` (in-memory cloud) and `native`
    pub fn with_defaults() -> Self {
        Self::with_demo_cloud(DemoCloud::new())
    }

    /// Registry with `demo` bound to `cloud`, and `native`
    pub fn with_demo_cloud(cloud: DemoCloud) -> Self {
        let mut registry = Self::new();
        registry.register(
            "demo",
            Arc::new(move || Box::new(DemoProvider::new(cloud.clone())) as Box<dyn Provider>),
        );
        registry.register(
            "native",
            Arc::new(|| Box::new(NativeProvider::new()) as Box<dyn Provider>),
        );
        registry
    }

    /// Register a provider factory under `name`
    pub fn register(&mut self, name: &str, factory: ProviderFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Build a provider by name
    pub fn build(&self, name: &str) -> Result<Box<dyn Provider>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::NotFound(format!("provider {name:?} is not registered")))
    }

    /// Registered provider names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
