use asq_core::{Error, Handler, IntoHandler, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of handlers by task name
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` under `name`. Names are unique.
    pub fn register<M, H>(&self, name: impl Into<String>, handler: H) -> Result<()>
    where
        H: IntoHandler<M>,
    {
        let name = name.into();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        handlers.insert(name, handler.into_handler());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Handler>> {
        let handlers = self.handlers.read();
        handlers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
