//! Process-wide vertex factory registry.
//!
//! Definition rows persist only a registry key; every process that
//! should materialise vertices of a given definition registers the
//! matching factory at start-up.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

use crate::vertex::Vertex;

/// Factory closure producing a fresh vertex object.
pub type VertexConstructor = Arc<dyn Fn() -> Arc<dyn Vertex> + Send + Sync>;

/// Named factories for vertex definitions.
#[derive(Clone, Default)]
pub struct VertexFactoryRegistry {
    factories: Arc<DashMap<String, VertexConstructor>>,
}

impl VertexFactoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for a definition.
    pub fn register<F>(&self, definition: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Vertex> + Send + Sync + 'static,
    {
        self.factories
            .insert(definition.to_owned(), Arc::new(factory));
    }

    /// Creates a new vertex of the named definition, if registered.
    #[must_use]
    pub fn create(&self, definition: &str) -> Option<Arc<dyn Vertex>> {
        self.factories.get(definition).map(|f| f())
    }

    /// Whether a factory is registered for the definition.
    #[must_use]
    pub fn contains(&self, definition: &str) -> bool {
        self.factories.contains_key(definition)
    }

    /// Names of every registered definition.
    #[must_use]
    pub fn definitions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for VertexFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexFactoryRegistry")
            .field("definitions", &self.definitions())
            .finish_non_exhaustive()
    }
}

static GLOBAL_REGISTRY: LazyLock<VertexFactoryRegistry> =
    LazyLock::new(VertexFactoryRegistry::new);

/// The process-wide registry used by the worker binary.
#[must_use]
pub fn global_registry() -> &'static VertexFactoryRegistry {
    &GLOBAL_REGISTRY
}
