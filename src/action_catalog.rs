use crate::models::{Action, ActionKind, ActionRecord, Target};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;

/// Actions proposed for one target.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub target: Target,
    pub actions: Vec<Action>,
}

/// Deduplicated proposals keyed by target identity, in first-seen order.
///
/// The first target inserted for an identity is canonical: every later
/// action with the same identity is rebound to share it.
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    entries: IndexMap<String, CatalogEntry>,
}

#[derive(Debug, Serialize)]
pub struct ExportedEntry<'a> {
    pub actions: Vec<ActionRecord<'a>>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `action` unless an equal action is already recorded. Returns
    /// whether it was added.
    pub fn insert(&mut self, mut action: Action) -> bool {
        let entry = self
            .entries
            .entry(action.identifier().to_string())
            .or_insert_with(|| CatalogEntry {
                target: action.target(),
                actions: Vec::new(),
            });

        if !action.rebind(&entry.target) {
            // Kinds disagree; the first one keeps the identity.
            return false;
        }
        if entry.actions.contains(&action) {
            return false;
        }
        entry.actions.push(action);
        true
    }

    pub fn get(&self, identifier: &str) -> Option<&CatalogEntry> {
        self.entries.get(identifier)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.entries.values().flat_map(|entry| entry.actions.iter())
    }

    pub fn target_count(&self) -> usize {
        self.entries.len()
    }

    pub fn action_count(&self) -> usize {
        self.entries.values().map(|entry| entry.actions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts_by_kind(&self) -> BTreeMap<ActionKind, usize> {
        let mut counts = BTreeMap::new();
        for action in self.actions() {
            *counts.entry(action.kind()).or_insert(0) += 1;
        }
        counts
    }

    /// Identity to `{actions: [...]}`, preserving insertion order.
    pub fn export(&self) -> IndexMap<&str, ExportedEntry<'_>> {
        self.entries
            .iter()
            .map(|(identifier, entry)| {
                (
                    identifier.as_str(),
                    ExportedEntry {
                        actions: entry.actions.iter().map(ActionRecord::from).collect(),
                    },
                )
            })
            .collect()
    }
}
