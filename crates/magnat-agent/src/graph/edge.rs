use std::collections::BTreeMap;

use magnat_core::error::{MagnatError, Result};
use magnat_core::types::Action;

use super::node::StepId;

/// Routing table: `(source step, outcome label) -> successor`.
///
/// Each pair maps to at most one successor. A missing pair means the source
/// step is terminal for that label.
#[derive(Debug, Clone, Default)]
pub struct EdgeTable {
    routes: BTreeMap<StepId, BTreeMap<Action, StepId>>,
}

impl EdgeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `from --label--> to`. Registering the same pair twice is a
    /// configuration error, even when the target is identical.
    pub fn register(&mut self, from: StepId, label: Action, to: StepId) -> Result<()> {
        let outgoing = self.routes.entry(from.clone()).or_default();
        if let Some(existing) = outgoing.get(&label) {
            return Err(MagnatError::Config(format!(
                "duplicate edge: '{}' --{}--> already routes to '{}' (attempted '{}')",
                from, label, existing, to
            )));
        }
        outgoing.insert(label, to);
        Ok(())
    }

    pub fn lookup(&self, from: &StepId, label: &Action) -> Option<&StepId> {
        self.routes.get(from).and_then(|out| out.get(label))
    }

    /// All labelled edges leaving `from`, ordered by label.
    pub fn outgoing(&self, from: &StepId) -> impl Iterator<Item = (&Action, &StepId)> {
        self.routes.get(from).into_iter().flat_map(|out| out.iter())
    }

    /// Every `(from, label, to)` triple.
    pub fn iter(&self) -> impl Iterator<Item = (&StepId, &Action, &StepId)> {
        self.routes
            .iter()
            .flat_map(|(from, out)| out.iter().map(move |(label, to)| (from, label, to)))
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(|out| out.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> StepId {
        StepId::new(name)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut table = EdgeTable::new();
        table
            .register(id("security"), Action::Safe, id("classifier"))
            .unwrap();
        table
            .register(id("security"), Action::Unsafe, id("refusal"))
            .unwrap();

        assert_eq!(
            table.lookup(&id("security"), &Action::Safe),
            Some(&id("classifier"))
        );
        assert_eq!(
            table.lookup(&id("security"), &Action::Unsafe),
            Some(&id("refusal"))
        );
        assert_eq!(table.lookup(&id("security"), &Action::Default), None);
        assert_eq!(table.lookup(&id("refusal"), &Action::Default), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let mut table = EdgeTable::new();
        table.register(id("a"), Action::Tools, id("b")).unwrap();

        let err = table.register(id("a"), Action::Tools, id("c")).unwrap_err();
        assert!(matches!(err, MagnatError::Config(_)));
        assert!(err.to_string().contains("duplicate edge"));

        // Same target is still a duplicate.
        assert!(table.register(id("a"), Action::Tools, id("b")).is_err());
        assert_eq!(table.lookup(&id("a"), &Action::Tools), Some(&id("b")));
    }

    #[test]
    fn test_task_labels_are_distinct() {
        let mut table = EdgeTable::new();
        table
            .register(id("classifier"), Action::task("general"), id("assistant"))
            .unwrap();
        table
            .register(id("classifier"), Action::task("adding"), id("ingest"))
            .unwrap();

        let labels: Vec<String> = table
            .outgoing(&id("classifier"))
            .map(|(label, _)| label.to_string())
            .collect();
        assert_eq!(labels, vec!["adding", "general"]);
        assert_eq!(table.iter().count(), 2);
    }
}
