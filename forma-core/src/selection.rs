/// Ordered multi-selection. The most recently selected id is the primary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: Vec<String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Primary selection (most recently toggled on).
    pub fn primary(&self) -> Option<&str> {
        self.ids.last().map(String::as_str)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|s| s == id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Replace the whole selection with a single id.
    pub fn replace(&mut self, id: impl Into<String>) {
        self.ids.clear();
        self.ids.push(id.into());
    }

    /// Add `id` (making it primary) or remove it if already selected.
    /// Returns whether `id` is selected afterwards.
    pub fn toggle(&mut self, id: &str) -> bool {
        if let Some(pos) = self.ids.iter().position(|s| s == id) {
            self.ids.remove(pos);
            false
        } else {
            self.ids.push(id.to_string());
            true
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|s| s != id);
        before != self.ids.len()
    }

    /// Keep only ids for which `keep` holds. Returns true if anything changed.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> bool {
        let before = self.ids.len();
        self.ids.retain(|s| keep(s));
        before != self.ids.len()
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.ids.is_empty();
        self.ids.clear();
        changed
    }
}
