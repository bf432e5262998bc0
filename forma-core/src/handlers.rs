//! Event handler registry.
//!
//! Components reference handlers by key through [`EventBinding`]s. The host
//! registers the callable behind each key; dispatch looks keys up and never
//! compiles anything from component data.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::component::Component;
use crate::error::StoreError;

/// What a handler sees when it runs.
#[derive(Debug)]
pub struct HandlerContext<'a> {
    pub component: &'a Component,
    pub event: &'a str,
    /// Static arguments from the binding.
    pub args: &'a Value,
}

type Handler = Box<dyn Fn(&HandlerContext<'_>) + Send + Sync>;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&HandlerContext<'_>) + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Run every handler bound to `event` on `component`, in binding order.
    ///
    /// All keys are resolved before any handler runs, so an unknown key
    /// fails the whole dispatch without partial side effects. Returns the
    /// number of handlers run.
    pub fn dispatch(&self, component: &Component, event: &str) -> Result<usize, StoreError> {
        let resolved = component
            .events
            .iter()
            .filter(|binding| binding.event == event)
            .map(|binding| {
                self.handlers
                    .get(&binding.handler)
                    .map(|handler| (handler, binding))
                    .ok_or_else(|| StoreError::UnknownHandler(binding.handler.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (handler, binding) in &resolved {
            let ctx = HandlerContext {
                component,
                event,
                args: &binding.args,
            };
            handler(&ctx);
        }
        log::debug!(
            "Dispatched {} handler(s) for '{event}' on {}",
            resolved.len(),
            component.id
        );
        Ok(resolved.len())
    }

    /// Keys referenced by `component` that have no registered handler.
    pub fn missing_handlers<'c>(&self, component: &'c Component) -> Vec<&'c str> {
        component
            .events
            .iter()
            .filter(|binding| !self.handlers.contains_key(&binding.handler))
            .map(|binding| binding.handler.as_str())
            .collect()
    }
}
