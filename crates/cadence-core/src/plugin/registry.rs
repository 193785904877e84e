//! Plugin registry - creates plugins from persisted state

use std::collections::HashMap;

use super::hosted::{HostedPlugin, InstanceConstructor};
use super::native::native_instances;
use super::{GainEnvelope, Plugin, PluginState};
use crate::error::{EngineError, EngineResult};
use crate::types::SAMPLE_RATE;

/// Builds plugins from a [`PluginState`] type discriminator
pub trait PluginFactory {
    fn create_plugin(&self, state: &PluginState) -> EngineResult<Box<dyn Plugin>>;
}

/// Known plugin instances keyed by URI
///
/// Built-in native instances are always registered. Adapters for external
/// plugin formats add their constructors with [`PluginRegistry::register`].
pub struct PluginRegistry {
    sample_rate: u32,
    instances: HashMap<String, InstanceConstructor>,
}

impl PluginRegistry {
    pub fn new(sample_rate: u32) -> Self {
        let mut registry = Self {
            sample_rate,
            instances: HashMap::new(),
        };
        for (uri, constructor) in native_instances() {
            registry.register(uri, constructor);
        }
        registry
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Register (or replace) the constructor for `uri`
    pub fn register(&mut self, uri: impl Into<String>, constructor: InstanceConstructor) {
        let uri = uri.into();
        if self.instances.insert(uri.clone(), constructor).is_some() {
            log::warn!("PluginRegistry: replaced constructor for '{}'", uri);
        } else {
            log::debug!("PluginRegistry: registered '{}'", uri);
        }
    }

    pub fn available_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.instances.keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Instantiate a hosted plugin by URI
    pub fn create_hosted(&self, uri: &str) -> EngineResult<HostedPlugin> {
        let constructor = self
            .instances
            .get(uri)
            .ok_or_else(|| EngineError::PluginUnavailable(uri.to_string()))?;
        HostedPlugin::new(constructor, self.sample_rate)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}

impl PluginFactory for PluginRegistry {
    fn create_plugin(&self, state: &PluginState) -> EngineResult<Box<dyn Plugin>> {
        let mut plugin: Box<dyn Plugin> = match state.kind.as_str() {
            GainEnvelope::TYPE_NAME => Box::new(GainEnvelope::new()),
            HostedPlugin::TYPE_NAME => {
                let uri = state.uri.as_deref().ok_or_else(|| {
                    EngineError::InvalidState("hosted plugin state without uri".to_string())
                })?;
                Box::new(self.create_hosted(uri)?)
            }
            other => return Err(EngineError::PluginUnavailable(other.to_string())),
        };
        plugin.set_state(state)?;
        Ok(plugin)
    }
}
