//! Filter registry for managing available filter types.

use crate::core::image::Pixel;
use crate::core::node::{Category, NodeMetadata, ProcessObject};
use indexmap::IndexMap;
use std::sync::Arc;

/// Factory function for creating filter instances.
pub type FilterFactory<T> = Arc<dyn Fn() -> Box<dyn ProcessObject<T>> + Send + Sync>;

/// Registry entry containing metadata and factory.
pub struct RegistryEntry<T: Pixel> {
    /// Factory function to create instances.
    pub factory: FilterFactory<T>,
    /// Cached metadata (avoids creating instance just to get metadata).
    pub metadata: NodeMetadata,
    /// Whether this filter is enabled.
    pub enabled: bool,
}

impl<T: Pixel> Clone for RegistryEntry<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            metadata: self.metadata.clone(),
            enabled: self.enabled,
        }
    }
}

/// Registry of filter types that can be created by id.
///
/// Sources are not registered: they need an image or a reader to be built.
pub struct FilterRegistry<T: Pixel> {
    /// Filters indexed by their unique ID.
    filters: IndexMap<String, RegistryEntry<T>>,
    /// Filters grouped by category.
    categories: IndexMap<Category, Vec<String>>,
}

impl<T: Pixel> FilterRegistry<T> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            filters: IndexMap::new(),
            categories: IndexMap::new(),
        }
    }

    /// Create a registry pre-populated with built-in filters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::filters::register_builtins(&mut registry);
        registry
    }

    /// Register a filter type. A later registration with the same id
    /// replaces the earlier one.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn ProcessObject<T>> + Send + Sync + 'static,
    {
        // Create a temporary instance to get metadata
        let metadata = factory().metadata();
        let id = metadata.id.clone();
        let category = metadata.category;

        if self.filters.contains_key(&id) {
            self.unregister(&id);
        }
        self.filters.insert(
            id.clone(),
            RegistryEntry {
                factory: Arc::new(factory),
                metadata,
                enabled: true,
            },
        );
        self.categories.entry(category).or_default().push(id);
    }

    /// Create a new instance of a filter by ID.
    pub fn create(&self, id: &str) -> Option<Box<dyn ProcessObject<T>>> {
        self.filters.get(id).filter(|e| e.enabled).map(|e| (e.factory)())
    }

    /// Get metadata for a filter without creating an instance.
    pub fn get_metadata(&self, id: &str) -> Option<&NodeMetadata> {
        self.filters.get(id).map(|e| &e.metadata)
    }

    /// Check if a filter is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.filters.contains_key(id)
    }

    /// Get all registered filter IDs.
    pub fn filter_ids(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(|s| s.as_str())
    }

    /// Get all registered filters.
    pub fn filters(&self) -> impl Iterator<Item = (&str, &RegistryEntry<T>)> {
        self.filters.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Get filters by category.
    pub fn filters_by_category(&self, category: Category) -> Vec<&str> {
        self.categories
            .get(&category)
            .map(|ids| ids.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// Get all categories.
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.keys()
    }

    /// Search filters by id, name, description or tag.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();

        self.filters
            .iter()
            .filter(|(_, entry)| {
                let metadata = &entry.metadata;
                metadata.id.to_lowercase().contains(&query)
                    || metadata.name.to_lowercase().contains(&query)
                    || metadata.description.to_lowercase().contains(&query)
                    || metadata.tags.iter().any(|t| t.to_lowercase().contains(&query))
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Enable or disable a filter.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        if let Some(entry) = self.filters.get_mut(id) {
            entry.enabled = enabled;
            true
        } else {
            false
        }
    }

    /// Unregister a filter.
    pub fn unregister(&mut self, id: &str) -> bool {
        if let Some(entry) = self.filters.shift_remove(id) {
            if let Some(ids) = self.categories.get_mut(&entry.metadata.category) {
                ids.retain(|i| i != id);
            }
            true
        } else {
            false
        }
    }

    /// Get the total number of registered filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Enabled filters grouped by category, each group sorted by name.
    pub fn grouped_by_category(&self) -> IndexMap<Category, Vec<&NodeMetadata>> {
        let mut grouped: IndexMap<Category, Vec<&NodeMetadata>> = IndexMap::new();

        for entry in self.filters.values().filter(|e| e.enabled) {
            grouped.entry(entry.metadata.category).or_default().push(&entry.metadata);
        }
        for filters in grouped.values_mut() {
            filters.sort_by(|a, b| a.name.cmp(&b.name));
        }

        grouped
    }
}

impl<T: Pixel> Default for FilterRegistry<T> {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::monitor::PipelineMonitor;
    use crate::filters::pointwise::ShiftScaleFilter;

    #[test]
    fn test_register_and_create() {
        let mut registry: FilterRegistry<f32> = FilterRegistry::new();
        registry.register(|| Box::new(ShiftScaleFilter::default()));

        assert!(registry.contains("shift_scale"));
        assert!(registry.create("shift_scale").is_some());
        assert_eq!(registry.get_metadata("shift_scale").unwrap().name, "Shift Scale");
    }

    #[test]
    fn test_builtins() {
        let registry: FilterRegistry<u8> = FilterRegistry::with_builtins();

        for id in ["shift_scale", "mean", "extract", "join_series", "monitor"] {
            assert!(registry.contains(id), "missing {id}");
        }
        assert_eq!(registry.filters_by_category(Category::Join), vec!["join_series"]);
        assert!(registry.filters_by_category(Category::Source).is_empty());
    }

    #[test]
    fn test_search() {
        let registry: FilterRegistry<f32> = FilterRegistry::with_builtins();

        assert_eq!(registry.search("smooth"), vec!["mean"]);
        assert!(registry.search("nonexistent").is_empty());
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry: FilterRegistry<f32> = FilterRegistry::new();
        registry.register(|| Box::new(PipelineMonitor::new()));
        registry.register(|| Box::new(PipelineMonitor::new()));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.filters_by_category(Category::Utility).len(), 1);
    }

    #[test]
    fn test_enable_disable_unregister() {
        let mut registry: FilterRegistry<f32> = FilterRegistry::with_builtins();

        registry.set_enabled("mean", false);
        assert!(registry.create("mean").is_none());
        assert!(!registry.grouped_by_category().contains_key(&Category::Neighborhood));

        registry.set_enabled("mean", true);
        assert!(registry.create("mean").is_some());

        assert!(registry.unregister("mean"));
        assert!(!registry.contains("mean"));
        assert!(!registry.unregister("mean"));
    }
}
