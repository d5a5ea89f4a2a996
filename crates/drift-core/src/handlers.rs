//! Item handler selection.
//!
//! Front ends register handlers for the item types they know how to present
//! or act on. [`HandlerRegistry::handler_for`] picks the first registered
//! handler that accepts an item and falls back to a catch-all handler, so
//! every item gets exactly one handler and the choice is deterministic.

use drift_files::{Item, TypeClassifier};
use std::sync::Arc;

/// Something that can act on items of certain types
pub trait ItemHandler: Send + Sync {
    /// Name used for unregistering and logging
    fn name(&self) -> &str;

    /// Types this handler accepts (conformance, not equality)
    fn handled_types(&self) -> &[String];

    /// Returns true if this handler accepts `item`
    fn can_handle(&self, item: &Item, classifier: &dyn TypeClassifier) -> bool {
        self.handled_types()
            .iter()
            .any(|ty| classifier.conforms_to(item.item_type(), ty))
    }
}

/// Ordered set of handlers with a fallback.
///
/// Generic over the handler trait object so front ends can extend
/// [`ItemHandler`] with their own action methods.
pub struct HandlerRegistry<H: ?Sized + ItemHandler = dyn ItemHandler> {
    handlers: Vec<Arc<H>>,
    fallback: Arc<H>,
    classifier: Arc<dyn TypeClassifier>,
}

impl<H: ?Sized + ItemHandler> HandlerRegistry<H> {
    /// Create a registry with only the fallback
    pub fn new(fallback: Arc<H>, classifier: Arc<dyn TypeClassifier>) -> Self {
        Self {
            handlers: Vec::new(),
            fallback,
            classifier,
        }
    }

    /// Append a handler; earlier registrations win
    pub fn register(&mut self, handler: Arc<H>) {
        tracing::debug!(handler = handler.name(), "Registered item handler");
        self.handlers.push(handler);
    }

    /// Remove every handler with this name; returns true if any was removed
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.name() != name);
        self.handlers.len() != before
    }

    /// Registered handlers in priority order (fallback excluded)
    pub fn handlers(&self) -> &[Arc<H>] {
        &self.handlers
    }

    /// The fallback handler
    pub fn fallback(&self) -> &Arc<H> {
        &self.fallback
    }

    /// First handler accepting `item`, else the fallback
    pub fn handler_for(&self, item: &Item) -> Arc<H> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(item, self.classifier.as_ref()))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_files::{Metadata, TypeTree};

    struct Named {
        name: String,
        types: Vec<String>,
    }

    impl Named {
        fn new(name: &str, types: &[&str]) -> Arc<dyn ItemHandler> {
            Arc::new(Self {
                name: name.to_string(),
                types: types.iter().map(|t| t.to_string()).collect(),
            })
        }
    }

    impl ItemHandler for Named {
        fn name(&self) -> &str {
            &self.name
        }

        fn handled_types(&self) -> &[String] {
            &self.types
        }
    }

    fn item(item_type: &str) -> Item {
        Item::from_buffer(Vec::new(), "t", item_type, Metadata::new())
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new(Named::new("fallback", &[]), Arc::new(TypeTree::with_defaults()))
    }

    #[test]
    fn test_fallback_when_empty() {
        let registry = registry();
        assert_eq!(registry.handler_for(&item("image/png")).name(), "fallback");
        assert!(registry.handlers().is_empty());
    }

    #[test]
    fn test_first_match_wins() {
        let mut registry = registry();
        registry.register(Named::new("images", &["public.image"]));
        registry.register(Named::new("png", &["image/png"]));
        registry.register(Named::new("text", &["public.text"]));

        assert_eq!(registry.handler_for(&item("image/png")).name(), "images");
        assert_eq!(registry.handler_for(&item("text/plain")).name(), "text");
        assert_eq!(registry.handler_for(&item("x-custom")).name(), "fallback");
    }

    #[test]
    fn test_unregister() {
        let mut registry = registry();
        registry.register(Named::new("images", &["public.image"]));
        registry.register(Named::new("png", &["image/png"]));
        assert!(registry.unregister("images"));
        assert!(!registry.unregister("images"));
        assert_eq!(registry.handler_for(&item("image/png")).name(), "png");
        assert_eq!(registry.handlers().len(), 1);
        assert_eq!(registry.fallback().name(), "fallback");
    }
}
