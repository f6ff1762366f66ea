use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    visit_expressions, Expr, Ident, ObjectName, Query, SetExpr, Statement, TableFactor, Visit,
    Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::{Parser, ParserError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::ControlFlow;
use tracing::debug;

/// Clause positions whose column references drive index proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseKind {
    #[serde(alias = "where")]
    Filter,
    #[serde(alias = "group")]
    GroupBy,
    #[serde(alias = "order")]
    OrderBy,
}

impl ClauseKind {
    pub const ALL: [ClauseKind; 3] = [ClauseKind::Filter, ClauseKind::GroupBy, ClauseKind::OrderBy];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClauseKind::Filter => "WHERE",
            ClauseKind::GroupBy => "GROUP BY",
            ClauseKind::OrderBy => "ORDER BY",
        }
    }
}

/// A column resolved against the schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TableColumn {
    pub table: String,
    pub column: String,
}

static NO_COLUMNS: BTreeSet<TableColumn> = BTreeSet::new();

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClauseReferences {
    /// Every relation named anywhere in the statement.
    pub tables: BTreeSet<String>,
    pub by_clause: BTreeMap<ClauseKind, BTreeSet<TableColumn>>,
    /// Aliases that were bound more than once.
    pub ambiguous_aliases: Vec<String>,
}

impl ClauseReferences {
    pub fn clause(&self, kind: ClauseKind) -> &BTreeSet<TableColumn> {
        self.by_clause.get(&kind).unwrap_or(&NO_COLUMNS)
    }

    /// Union of the columns of `table` referenced in any of `clauses`.
    pub fn columns_for_table(&self, table: &str, clauses: &[ClauseKind]) -> BTreeSet<String> {
        clauses
            .iter()
            .flat_map(|kind| self.clause(*kind))
            .filter(|column| column.table == table)
            .map(|column| column.column.clone())
            .collect()
    }
}

#[derive(Debug)]
struct PendingColumn {
    relation: Option<String>,
    name: String,
    kind: ClauseKind,
}

#[derive(Debug)]
struct ColumnRef {
    relation: Option<String>,
    name: String,
}

/// Parses `query` and resolves the columns it references in filter, group and
/// order clauses against `tables`. Unknown tables and columns are dropped.
pub fn resolve_clause_references(
    query: &str,
    tables: &BTreeMap<String, Vec<String>>,
) -> Result<ClauseReferences, ParserError> {
    let dialect = PostgreSqlDialect {};
    let statements = Parser::parse_sql(&dialect, query)?;

    let mut collector = ClauseCollector::default();
    let _ = statements.visit(&mut collector);

    Ok(collector.resolve(tables))
}

#[derive(Default)]
struct ClauseCollector {
    referenced_tables: BTreeSet<String>,
    alias_map: HashMap<String, String>,
    ambiguous_aliases: Vec<String>,
    pending: Vec<PendingColumn>,
}

impl Visitor for ClauseCollector {
    type Break = ();

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if let Some(table) = table_name(relation) {
            self.referenced_tables.insert(table);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Table {
            name,
            alias: Some(alias),
            ..
        } = table_factor
        {
            if let Some(table) = table_name(name) {
                self.bind_alias(normalize_ident(&alias.name), table);
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.collect_set_expr(&query.body);
        for order in &query.order_by {
            self.collect_clause(order, ClauseKind::OrderBy);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        match statement {
            Statement::Update {
                selection: Some(selection),
                ..
            } => self.collect_clause(selection, ClauseKind::Filter),
            Statement::Delete {
                selection: Some(selection),
                ..
            } => self.collect_clause(selection, ClauseKind::Filter),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

impl ClauseCollector {
    // Nested queries reach `pre_visit_query` on their own, so only the
    // selects belonging to this query body are handled here.
    fn collect_set_expr(&mut self, set_expr: &SetExpr) {
        match set_expr {
            SetExpr::Select(select) => {
                if let Some(selection) = &select.selection {
                    self.collect_clause(selection, ClauseKind::Filter);
                }
                self.collect_clause(&select.group_by, ClauseKind::GroupBy);
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left.as_ref());
                self.collect_set_expr(right.as_ref());
            }
            _ => {}
        }
    }

    fn collect_clause<V: Visit>(&mut self, node: &V, kind: ClauseKind) {
        let _ = visit_expressions(node, |expr| {
            if let Some(column) = column_ref_from_expr(expr) {
                self.pending.push(PendingColumn {
                    relation: column.relation,
                    name: column.name,
                    kind,
                });
            }
            ControlFlow::<()>::Continue(())
        });
    }

    fn bind_alias(&mut self, alias: String, table: String) {
        if let Some(previous) = self.alias_map.insert(alias.clone(), table) {
            debug!("Alias {alias} bound more than once (previously {previous})");
            self.ambiguous_aliases.push(alias);
        }
    }

    fn resolve(self, tables: &BTreeMap<String, Vec<String>>) -> ClauseReferences {
        let has_column = |table: &str, column: &str| {
            tables
                .get(table)
                .is_some_and(|columns| columns.iter().any(|c| c == column))
        };

        let mut references = ClauseReferences {
            tables: self.referenced_tables.clone(),
            by_clause: BTreeMap::new(),
            ambiguous_aliases: self.ambiguous_aliases,
        };

        for pending in self.pending {
            let candidates: Vec<String> = match &pending.relation {
                // Unqualified: any referenced table that has the column.
                None => self
                    .referenced_tables
                    .iter()
                    .filter(|table| has_column(table, &pending.name))
                    .cloned()
                    .collect(),
                Some(qualifier) => {
                    let table = self.alias_map.get(qualifier).unwrap_or(qualifier);
                    if has_column(table, &pending.name) {
                        vec![table.clone()]
                    } else {
                        Vec::new()
                    }
                }
            };

            if candidates.is_empty() {
                continue;
            }
            let entry = references.by_clause.entry(pending.kind).or_default();
            for table in candidates {
                entry.insert(TableColumn {
                    table,
                    column: pending.name.clone(),
                });
            }
        }

        references
    }
}

fn column_ref_from_expr(expr: &Expr) -> Option<ColumnRef> {
    match expr {
        Expr::Identifier(ident) => Some(ColumnRef {
            relation: None,
            name: normalize_ident(ident),
        }),
        Expr::CompoundIdentifier(idents) if idents.len() >= 2 => {
            let name = normalize_ident(&idents[idents.len() - 1]);
            let relation = normalize_ident(&idents[idents.len() - 2]);
            Some(ColumnRef {
                relation: Some(relation),
                name,
            })
        }
        _ => None,
    }
}

fn table_name(name: &ObjectName) -> Option<String> {
    name.0.last().map(normalize_ident)
}

/// Unquoted identifiers fold to lower case, quoted ones keep their spelling.
fn normalize_ident(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}
