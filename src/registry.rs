//! Named engines.
//!
//! Applications that talk to several servers can keep one [`Engine`] per
//! connection name here instead of passing engines around.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::config::ServerConfig;
use crate::engine::Engine;

#[derive(Debug, Default)]
pub struct Registry {
    engines: RwLock<HashMap<String, Engine>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine registered as `name`, creating a lazily-connecting one
    /// from `config` if there is none yet.
    pub fn get_or_create(&self, name: &str, config: impl FnOnce() -> ServerConfig) -> Engine {
        if let Some(engine) = self.engines.read().get(name) {
            return engine.clone();
        }
        self.engines
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(name, "registering engine");
                Engine::new(config())
            })
            .clone()
    }

    /// Register `engine` as `name`, returning the engine it replaced.
    pub fn insert(&self, name: impl Into<String>, engine: Engine) -> Option<Engine> {
        self.engines.write().insert(name.into(), engine)
    }

    pub fn get(&self, name: &str) -> Option<Engine> {
        self.engines.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Engine> {
        self.engines.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.engines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
