//! Copy-on-write backend table.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::GatewayError;
use crate::registry::{BackendDescriptor, RegistryError};

type Table = HashMap<String, Arc<BackendDescriptor>>;

/// Registry of backend descriptors keyed by id.
///
/// Readers take a lock-free snapshot; writers clone the table, change the copy
/// and publish it with a single pointer swap.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    table: ArcSwap<Table>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an initial set of descriptors.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = BackendDescriptor>) -> Self {
        let registry = Self::new();
        registry.swap_all(descriptors);
        registry
    }

    /// Look up a backend by id.
    pub fn lookup(&self, backend_id: &str) -> Result<Arc<BackendDescriptor>, GatewayError> {
        self.table
            .load()
            .get(backend_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownBackend(backend_id.to_string()))
    }

    /// Add a backend that is not yet registered.
    pub fn register(&self, descriptor: BackendDescriptor) -> Result<(), RegistryError> {
        let descriptor = Arc::new(descriptor);
        let mut conflict = false;

        self.table.rcu(|current| {
            conflict = current.contains_key(&descriptor.id);
            if conflict {
                return Arc::clone(current);
            }
            let mut next = Table::clone(current);
            next.insert(descriptor.id.clone(), Arc::clone(&descriptor));
            Arc::new(next)
        });

        if conflict {
            return Err(RegistryError::AlreadyRegistered(descriptor.id.clone()));
        }
        tracing::info!(backend = %descriptor.id, pattern = %descriptor.pattern, "Backend registered");
        Ok(())
    }

    /// Swap in a new descriptor for an existing backend, returning the old one.
    pub fn replace(&self, descriptor: BackendDescriptor) -> Result<Arc<BackendDescriptor>, RegistryError> {
        let descriptor = Arc::new(descriptor);
        let mut previous = None;

        self.table.rcu(|current| {
            previous = current.get(&descriptor.id).cloned();
            if previous.is_none() {
                return Arc::clone(current);
            }
            let mut next = Table::clone(current);
            next.insert(descriptor.id.clone(), Arc::clone(&descriptor));
            Arc::new(next)
        });

        let previous = previous.ok_or_else(|| RegistryError::NotRegistered(descriptor.id.clone()))?;
        tracing::info!(
            backend = %descriptor.id,
            old_pattern = %previous.pattern,
            new_pattern = %descriptor.pattern,
            "Backend descriptor replaced"
        );
        Ok(previous)
    }

    /// Replace the whole table (configuration reload).
    pub fn swap_all(&self, descriptors: impl IntoIterator<Item = BackendDescriptor>) {
        let next: Table = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect();
        let count = next.len();
        self.table.store(Arc::new(next));
        tracing::info!(backends = count, "Backend table swapped");
    }

    /// Current table, consistent as of the moment of the call.
    pub fn snapshot(&self) -> Arc<Table> {
        self.table.load_full()
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
