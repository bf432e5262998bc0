//! The design store: canonical component tree, selection, clipboard,
//! undo/redo history and external data.
//!
//! Every tree mutation goes through this type, whether it originated
//! locally or was applied from a remote collaborator. Subscribers are
//! notified synchronously after each change.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use crate::component::{Component, Direction, PASTE_OFFSET_PX};
use crate::data::{resolve_path, DataStore, TransformRegistry};
use crate::document::DesignDocument;
use crate::error::StoreError;
use crate::history::History;
use crate::selection::Selection;

/// Change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ComponentAdded { id: String },
    ComponentUpdated { id: String },
    ComponentDeleted { id: String },
    ComponentMoved { id: String, from: usize, to: usize },
    SelectionChanged { primary: Option<String> },
    ClipboardChanged { id: String },
    StateSaved,
    Undone,
    Redone,
    /// The whole tree was replaced (document load).
    Replaced,
    DataSourceChanged { source: String },
}

pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&StoreEvent) + Send>;

pub struct DesignStore {
    components: Vec<Component>,
    selection: Selection,
    clipboard: Option<Component>,
    history: History,
    data: DataStore,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: SubscriptionId,
}

impl fmt::Debug for DesignStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesignStore")
            .field("components", &self.components.len())
            .field("selection", &self.selection)
            .field("clipboard", &self.clipboard.as_ref().map(|c| &c.id))
            .field("undo_depth", &self.history.undo_depth())
            .field("redo_depth", &self.history.redo_depth())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl Default for DesignStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DesignStore {
    pub fn new() -> Self {
        Self::with_history(History::new())
    }

    /// Store whose undo stack keeps at most `limit` snapshots.
    pub fn with_history_limit(limit: usize) -> Self {
        Self::with_history(History::with_limit(limit))
    }

    fn with_history(history: History) -> Self {
        Self {
            components: Vec::new(),
            selection: Selection::new(),
            clipboard: None,
            history,
            data: DataStore::new(),
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    /// Build a store from a saved document. Fails on duplicate ids.
    pub fn from_document(doc: DesignDocument) -> Result<Self, StoreError> {
        let mut store = Self::new();
        store.load_document(doc)?;
        Ok(store)
    }

    /// Replace the tree with `doc`'s components, resetting selection and
    /// history. Fails on duplicate ids, leaving the store untouched.
    pub fn load_document(&mut self, doc: DesignDocument) -> Result<(), StoreError> {
        let mut seen = std::collections::HashSet::new();
        for c in &doc.components {
            if !seen.insert(c.id.as_str()) {
                return Err(StoreError::DuplicateId(c.id.clone()));
            }
        }
        self.components = doc.components;
        self.selection.clear();
        self.history.clear();
        log::info!("Loaded design {} ({} components)", doc.id, self.components.len());
        self.notify(StoreEvent::Replaced);
        Ok(())
    }

    pub fn to_document(&self, id: impl Into<String>) -> DesignDocument {
        DesignDocument::new(id, self.components.clone())
    }

    // ───────────────────────────────────────────────────────────────
    // Observers
    // ───────────────────────────────────────────────────────────────

    /// Register a change listener. It runs synchronously after every change.
    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        before != self.subscribers.len()
    }

    fn notify(&mut self, event: StoreEvent) {
        for (_, listener) in self.subscribers.iter_mut() {
            listener(&event);
        }
    }

    fn notify_selection(&mut self) {
        let primary = self.selection.primary().map(str::to_string);
        self.notify(StoreEvent::SelectionChanged { primary });
    }

    // ───────────────────────────────────────────────────────────────
    // Queries
    // ───────────────────────────────────────────────────────────────

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.components.iter().position(|c| c.id == id)
    }

    /// Primary selection.
    pub fn selected_id(&self) -> Option<&str> {
        self.selection.primary()
    }

    /// All selected ids, oldest first; the last one is primary.
    pub fn selected_ids(&self) -> &[String] {
        self.selection.ids()
    }

    pub fn clipboard(&self) -> Option<&Component> {
        self.clipboard.as_ref()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_depth(&self) -> usize {
        self.history.undo_depth()
    }

    pub fn redo_depth(&self) -> usize {
        self.history.redo_depth()
    }

    // ───────────────────────────────────────────────────────────────
    // Tree mutations (all undoable)
    // ───────────────────────────────────────────────────────────────

    /// Push a copy of the current tree onto the undo stack and drop any
    /// redo history.
    pub fn save_state(&mut self) {
        self.history.record(&self.components);
        self.notify(StoreEvent::StateSaved);
    }

    /// Append `component` and select it.
    ///
    /// A component whose id is already present is rejected and nothing
    /// (including history) changes.
    pub fn add_component(&mut self, component: Component) -> Result<(), StoreError> {
        if self.contains(&component.id) {
            log::warn!("Rejected duplicate component id {}", component.id);
            return Err(StoreError::DuplicateId(component.id));
        }
        self.save_state();
        let id = component.id.clone();
        self.components.push(component);
        self.selection.replace(id.clone());
        self.notify(StoreEvent::ComponentAdded { id });
        self.notify_selection();
        Ok(())
    }

    /// Replace the component with the same id in place. Returns false (and
    /// changes nothing) when the id is unknown.
    pub fn update_component(&mut self, component: Component) -> bool {
        let Some(pos) = self.position(&component.id) else {
            log::debug!("Update for unknown component {} ignored", component.id);
            return false;
        };
        self.save_state();
        let id = component.id.clone();
        self.components[pos] = component;
        self.notify(StoreEvent::ComponentUpdated { id });
        true
    }

    /// Remove the component with `id`, deselecting it if selected.
    pub fn delete_component(&mut self, id: &str) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        self.save_state();
        self.components.remove(pos);
        let deselected = self.selection.remove(id);
        self.notify(StoreEvent::ComponentDeleted { id: id.to_string() });
        if deselected {
            self.notify_selection();
        }
        true
    }

    /// Swap the component with its neighbour in stacking order. No-op at
    /// either end of the sequence.
    pub fn move_component(&mut self, id: &str, direction: Direction) -> bool {
        let Some(from) = self.position(id) else {
            return false;
        };
        let to = match direction {
            Direction::Up if from + 1 < self.components.len() => from + 1,
            Direction::Down if from > 0 => from - 1,
            _ => return false,
        };
        self.save_state();
        self.components.swap(from, to);
        self.notify(StoreEvent::ComponentMoved {
            id: id.to_string(),
            from,
            to,
        });
        true
    }

    /// Restore the previous snapshot. Returns false when there is none.
    pub fn undo(&mut self) -> bool {
        let current = self.components.clone();
        let Some(previous) = self.history.undo(current) else {
            return false;
        };
        self.components = previous;
        self.notify(StoreEvent::Undone);
        self.prune_selection();
        true
    }

    /// Re-apply the most recently undone snapshot.
    pub fn redo(&mut self) -> bool {
        let current = self.components.clone();
        let Some(next) = self.history.redo(current) else {
            return false;
        };
        self.components = next;
        self.notify(StoreEvent::Redone);
        self.prune_selection();
        true
    }

    fn prune_selection(&mut self) {
        let live: std::collections::HashSet<String> =
            self.components.iter().map(|c| c.id.clone()).collect();
        if self.selection.retain(|id| live.contains(id)) {
            self.notify_selection();
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Selection
    // ───────────────────────────────────────────────────────────────

    /// Replace the selection with `id`, or clear it with `None`.
    pub fn select_component(&mut self, id: Option<&str>) -> Result<(), StoreError> {
        match id {
            Some(id) => {
                if !self.contains(id) {
                    return Err(StoreError::NotFound(id.to_string()));
                }
                self.selection.replace(id);
                self.notify_selection();
            }
            None => self.clear_selection(),
        }
        Ok(())
    }

    /// Add `id` to the selection (as primary) or remove it if present.
    /// Returns whether `id` is selected afterwards.
    pub fn toggle_selection(&mut self, id: &str) -> Result<bool, StoreError> {
        if !self.contains(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let selected = self.selection.toggle(id);
        self.notify_selection();
        Ok(selected)
    }

    pub fn clear_selection(&mut self) {
        if self.selection.clear() {
            self.notify_selection();
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Clipboard
    // ───────────────────────────────────────────────────────────────

    /// Copy the component with `id` to the clipboard.
    pub fn copy_component(&mut self, id: &str) -> Result<(), StoreError> {
        let copied = self
            .component(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.clipboard = Some(copied);
        self.notify(StoreEvent::ClipboardChanged { id: id.to_string() });
        Ok(())
    }

    /// Add a copy of the clipboard component with a fresh id, shifted by
    /// 20px on `left` and `top`, and select it. Returns the new id, or
    /// `None` when the clipboard is empty.
    pub fn paste_component(&mut self) -> Option<String> {
        let mut pasted = self.clipboard.clone()?;
        pasted.id = self.fresh_id(&pasted.kind);
        pasted.offset_style("left", PASTE_OFFSET_PX);
        pasted.offset_style("top", PASTE_OFFSET_PX);
        let id = pasted.id.clone();
        match self.add_component(pasted) {
            Ok(()) => Some(id),
            Err(e) => {
                log::error!("Paste failed: {e}");
                None
            }
        }
    }

    /// `{kind}_{millis}`, suffixed when several pastes land in the same
    /// millisecond.
    fn fresh_id(&self, kind: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let base = format!("{kind}_{millis}");
        if !self.contains(&base) {
            return base;
        }
        (1u32..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or(base)
    }

    // ───────────────────────────────────────────────────────────────
    // External data
    // ───────────────────────────────────────────────────────────────

    pub fn set_data_source(&mut self, source: impl Into<String>, value: Value) {
        let source = source.into();
        self.data.insert(source.clone(), value);
        self.notify(StoreEvent::DataSourceChanged { source });
    }

    pub fn remove_data_source(&mut self, source: &str) -> Option<Value> {
        let removed = self.data.remove(source);
        if removed.is_some() {
            self.notify(StoreEvent::DataSourceChanged {
                source: source.to_string(),
            });
        }
        removed
    }

    /// Resolve a dotted `path` inside the data source `source`.
    pub fn get_data(&self, source: &str, path: &str) -> Option<&Value> {
        resolve_path(self.data.get(source)?, path)
    }

    /// Resolve every data binding of `component` into prop values.
    ///
    /// Unresolvable paths yield `null`. An unknown transform name fails.
    pub fn resolve_bindings(
        &self,
        component: &Component,
        transforms: &TransformRegistry,
    ) -> Result<Map<String, Value>, StoreError> {
        let mut resolved = Map::new();
        for binding in &component.data_bindings {
            let raw = self
                .get_data(&binding.source, &binding.path)
                .cloned()
                .unwrap_or(Value::Null);
            let value = match &binding.transform {
                Some(name) => transforms.apply(name, &raw)?,
                None => raw,
            };
            resolved.insert(binding.prop.clone(), value);
        }
        Ok(resolved)
    }
}
