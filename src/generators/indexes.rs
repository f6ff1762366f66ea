use super::{column_permutations, ActionGenerator, ActionStream};
use crate::analysis::{ClauseKind, ColumnReferenceStats, Workload};
use crate::facts::FactsHandle;
use crate::models::{Action, IndexTarget};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DropIndexArgs {
    pub cascade: bool,
}

/// Proposes dropping every index that already exists.
#[derive(Debug)]
pub struct DropIndexGenerator {
    facts: FactsHandle,
    cascade: bool,
}

impl DropIndexGenerator {
    pub fn new(facts: FactsHandle, args: DropIndexArgs) -> Self {
        Self {
            facts,
            cascade: args.cascade,
        }
    }
}

impl ActionGenerator for DropIndexGenerator {
    fn actions(&self) -> ActionStream<'_> {
        let cascade = self.cascade;
        Box::new(self.facts.indexes().iter().map(move |index| {
            let mut target = IndexTarget::new(index.table.clone(), index.columns.clone())
                .with_name(index.name.clone());
            if let Some(method) = &index.access_method {
                target = target.with_access_method(method.clone());
            }
            Ok(Action::drop_index(target, cascade))
        }))
    }
}

fn default_width() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExhaustiveIndexArgs {
    #[serde(default = "default_width")]
    pub max_width: usize,
}

impl Default for ExhaustiveIndexArgs {
    fn default() -> Self {
        Self {
            max_width: default_width(),
        }
    }
}

/// Proposes an index for every ordered column combination of every table.
#[derive(Debug)]
pub struct ExhaustiveIndexGenerator {
    facts: FactsHandle,
    max_width: usize,
}

impl ExhaustiveIndexGenerator {
    pub fn new(facts: FactsHandle, args: ExhaustiveIndexArgs) -> Self {
        Self {
            facts,
            max_width: args.max_width,
        }
    }
}

impl ActionGenerator for ExhaustiveIndexGenerator {
    fn actions(&self) -> ActionStream<'_> {
        let max_width = self.max_width;
        Box::new(
            self.facts
                .table_columns()
                .iter()
                .flat_map(move |(table, columns)| {
                    column_permutations(table.as_str(), vec![columns.clone()], max_width)
                })
                .map(|(table, columns)| Ok(Action::create_index(IndexTarget::new(table, columns)))),
        )
    }
}

fn all_clauses() -> Vec<ClauseKind> {
    ClauseKind::ALL.to_vec()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadIndexArgs {
    #[serde(default = "default_width")]
    pub max_width: usize,
    #[serde(default = "all_clauses")]
    pub clauses: Vec<ClauseKind>,
}

impl Default for WorkloadIndexArgs {
    fn default() -> Self {
        Self {
            max_width: default_width(),
            clauses: all_clauses(),
        }
    }
}

/// Proposes indexes over the columns that workload templates reference
/// together, heaviest column sets first.
#[derive(Debug)]
pub struct WorkloadIndexGenerator {
    stats: ColumnReferenceStats,
    max_width: usize,
}

impl WorkloadIndexGenerator {
    pub fn new(workload: &Workload, args: WorkloadIndexArgs) -> Self {
        let stats = workload.column_references(&args.clauses);
        debug!(
            "Workload index generator sees {} tables",
            stats.tables().count()
        );
        Self {
            stats,
            max_width: args.max_width,
        }
    }
}

impl ActionGenerator for WorkloadIndexGenerator {
    fn actions(&self) -> ActionStream<'_> {
        let max_width = self.max_width;
        let stats = &self.stats;
        Box::new(
            stats
                .tables()
                .flat_map(move |table| {
                    let column_sets = stats
                        .ranked(table)
                        .into_iter()
                        .map(|(columns, _)| columns.iter().cloned().collect())
                        .collect();
                    column_permutations(table, column_sets, max_width)
                })
                .map(|(table, columns)| Ok(Action::create_index(IndexTarget::new(table, columns)))),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypedIndexArgs {
    #[serde(alias = "types")]
    pub access_methods: Vec<String>,
}

/// Re-emits every index action of its upstream once per access method.
#[derive(Debug)]
pub struct TypedIndexGenerator {
    upstream: Arc<dyn ActionGenerator>,
    access_methods: Vec<String>,
}

impl TypedIndexGenerator {
    pub fn new(upstream: Arc<dyn ActionGenerator>, args: TypedIndexArgs) -> Self {
        Self {
            upstream,
            access_methods: args.access_methods,
        }
    }
}

impl ActionGenerator for TypedIndexGenerator {
    fn actions(&self) -> ActionStream<'_> {
        let methods = &self.access_methods;
        Box::new(self.upstream.actions().flat_map(move |item| {
            let retyped: Vec<_> = match item {
                Err(err) => vec![Err(err)],
                Ok(action) => methods
                    .iter()
                    .filter_map(|method| action.with_access_method(method))
                    .map(Ok)
                    .collect(),
            };
            retyped
        }))
    }
}
