/// Anything the registry can look up by provider name.
pub trait NamedProvider {
    fn name(&self) -> &str;
}

/// Candidate backends in construction order; lookups are by exact name.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    entries: Vec<T>,
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(entries: Vec<T>) -> Self {
        Self { entries }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name() == name)
    }

    /// Consume the registry, keeping only the entry called `name`.
    pub fn take(self, name: &str) -> Option<T> {
        self.entries.into_iter().find(|entry| entry.name() == name)
    }

    /// Sorted, de-duplicated provider names for diagnostics.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
