//! # Adapter Registry
//!
//! Maps a provider slug to a factory and its static descriptor. Built once
//! at startup, then shared read-only as `Arc<AdapterRegistry>`.
//!
//! ```text
//! "square" ──► { factory: SquareAdapter::from_config, descriptor }
//! "toast"  ──► { factory: ToastAdapter::from_config,  descriptor }
//!
//! create_adapter("square", pos_config) ──► Box<dyn PosAdapter>
//! create_adapter("clover", ..)          ──► Err(UnknownProvider)
//! ```
//!
//! Lookups are case-sensitive.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::provider::{square, toast, PosAdapter, SquareAdapter, ToastAdapter};
use tupa_core::AdapterDescriptor;

/// Builds a configured adapter from a client's `pos_config`.
pub type AdapterFactory = Box<dyn Fn(&Value) -> SyncResult<Box<dyn PosAdapter>> + Send + Sync>;

struct Registration {
    factory: AdapterFactory,
    descriptor: AdapterDescriptor,
}

#[derive(Default)]
pub struct AdapterRegistry {
    providers: BTreeMap<String, Registration>,
}

impl AdapterRegistry {
    /// An empty registry (fake providers in tests).
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every vendor adapter compiled into the engine.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.providers.insert(
            square::PROVIDER_ID.to_string(),
            Registration {
                factory: Box::new(SquareAdapter::from_config),
                descriptor: SquareAdapter::descriptor(),
            },
        );
        registry.providers.insert(
            toast::PROVIDER_ID.to_string(),
            Registration {
                factory: Box::new(ToastAdapter::from_config),
                descriptor: ToastAdapter::descriptor(),
            },
        );
        registry
    }

    /// Adds a provider. Registering the same id twice is a configuration
    /// error.
    pub fn register<F>(&mut self, id: &str, factory: F, descriptor: AdapterDescriptor) -> SyncResult<()>
    where
        F: Fn(&Value) -> SyncResult<Box<dyn PosAdapter>> + Send + Sync + 'static,
    {
        if self.providers.contains_key(id) {
            return Err(SyncError::InvalidConfig(format!(
                "provider '{}' is already registered",
                id
            )));
        }
        debug!(provider = id, "Registering provider");
        self.providers.insert(
            id.to_string(),
            Registration {
                factory: Box::new(factory),
                descriptor,
            },
        );
        Ok(())
    }

    /// Builds an adapter for `id` from its provider-specific config.
    pub fn create_adapter(&self, id: &str, config: &Value) -> SyncResult<Box<dyn PosAdapter>> {
        let registration = self
            .providers
            .get(id)
            .ok_or_else(|| SyncError::UnknownProvider(id.to_string()))?;
        (registration.factory)(config)
    }

    /// Descriptors of every registered provider, ordered by id.
    pub fn list_providers(&self) -> Vec<AdapterDescriptor> {
        self.providers
            .values()
            .map(|r| r.descriptor.clone())
            .collect()
    }

    pub fn is_valid_provider(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn features_of(&self, id: &str) -> SyncResult<Vec<String>> {
        Ok(self.descriptor(id)?.features.clone())
    }

    pub fn descriptor(&self, id: &str) -> SyncResult<&AdapterDescriptor> {
        self.providers
            .get(id)
            .map(|r| &r.descriptor)
            .ok_or_else(|| SyncError::UnknownProvider(id.to_string()))
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
