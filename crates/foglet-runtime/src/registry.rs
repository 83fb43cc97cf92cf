//! Module registry
//!
//! Maps module names to live modules. The name doubles as the protocol of the
//! envelopes the module sends, so routing a received envelope is a single
//! lookup on `envelope.protocol`.

use foglet_core::{FogletError, Module, Result};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

struct Registered {
    module: Arc<dyn Module>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Modules attached to one peer, keyed by name
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Registered>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a module under its own name
    pub fn register<M: Module + 'static>(&mut self, module: Arc<M>) -> Result<()> {
        let name = module.name().to_string();
        if self.modules.contains_key(&name) {
            return Err(FogletError::config_error(format!(
                "a module named {} is already registered",
                name
            )));
        }
        info!("Module registry: registered {}", name);
        self.modules.insert(
            name,
            Registered {
                module: module.clone(),
                typed: module,
            },
        );
        Ok(())
    }

    /// The module registered under `name`, downcast to its concrete type
    pub fn get<M: Module + 'static>(&self, name: &str) -> Option<Arc<M>> {
        let registered = self.modules.get(name)?;
        registered.typed.clone().downcast::<M>().ok()
    }

    /// Module receiving envelopes of `protocol`
    pub fn route(&self, protocol: &str) -> Option<Arc<dyn Module>> {
        self.modules
            .get(protocol)
            .map(|registered| registered.module.clone())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.modules.remove(name).is_some();
        if removed {
            info!("Module registry: removed {}", name);
        }
        removed
    }

    /// Every module, in name order
    pub fn modules(&self) -> Vec<Arc<dyn Module>> {
        self.modules
            .values()
            .map(|registered| registered.module.clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
