use crate::analysis::fingerprint::{fingerprint, Fingerprint};
use crate::analysis::log::{read_query_log, LogError};
use crate::analysis::query_parser::{resolve_clause_references, ClauseKind, ClauseReferences};
use serde::Serialize;
use snafu::{ensure, ResultExt, Snafu};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

const COVERAGE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Snafu)]
pub enum WorkloadError {
    #[snafu(display("Failed to read workload: {}", source))]
    Log { source: LogError },

    #[snafu(display("Workload coverage must be in (0, 1], got {}", coverage))]
    Coverage { coverage: f64 },
}

type Result<T, E = WorkloadError> = std::result::Result<T, E>;

/// A group of structurally identical queries.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTemplate {
    pub fingerprint: Fingerprint,
    /// First query text seen for this fingerprint.
    pub sample: String,
    pub count: u64,
    pub fraction: f64,
    pub cumulative: f64,
    pub references: ClauseReferences,
}

/// Columns referenced together by one template on one table.
pub type JointColumns = BTreeSet<String>;

/// Per table, the weight accumulated by each joint column set.
#[derive(Debug, Clone, Default)]
pub struct ColumnReferenceStats {
    tables: BTreeMap<String, BTreeMap<JointColumns, u64>>,
}

impl ColumnReferenceStats {
    pub fn add(&mut self, table: &str, columns: JointColumns, weight: u64) {
        if columns.is_empty() {
            return;
        }
        *self
            .tables
            .entry(table.to_string())
            .or_default()
            .entry(columns)
            .or_insert(0) += weight;
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn weight(&self, table: &str, columns: &JointColumns) -> u64 {
        self.tables
            .get(table)
            .and_then(|sets| sets.get(columns))
            .copied()
            .unwrap_or(0)
    }

    /// Joint sets of `table`, heaviest first. Equal weights keep column order.
    pub fn ranked(&self, table: &str) -> Vec<(&JointColumns, u64)> {
        let mut ranked: Vec<_> = self
            .tables
            .get(table)
            .map(|sets| sets.iter().map(|(cols, weight)| (cols, *weight)).collect())
            .unwrap_or_default();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Representative templates of a query log, restricted to the most frequent
/// share of the workload.
#[derive(Debug, Clone)]
pub struct Workload {
    templates: Vec<QueryTemplate>,
    total_queries: u64,
    distinct_templates: usize,
    parse_failures: usize,
    malformed_records: usize,
}

impl Workload {
    pub fn from_log(
        path: &Path,
        tables: &BTreeMap<String, Vec<String>>,
        coverage: f64,
    ) -> Result<Self> {
        let extracted = read_query_log(path).context(LogSnafu)?;
        let mut workload = Self::from_queries(extracted.queries, tables, coverage)?;
        workload.malformed_records = extracted.malformed_records;
        Ok(workload)
    }

    pub fn from_queries<I, S>(
        queries: I,
        tables: &BTreeMap<String, Vec<String>>,
        coverage: f64,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ensure!(
            coverage > 0.0 && coverage <= 1.0,
            CoverageSnafu { coverage }
        );

        let mut groups: Vec<(Fingerprint, String, u64)> = Vec::new();
        let mut positions: HashMap<Fingerprint, usize> = HashMap::new();
        let mut parse_failures = 0;

        for query in queries {
            let query = query.as_ref();
            let fp = match fingerprint(query) {
                Ok(fp) => fp,
                Err(err) => {
                    debug!("Dropping unparseable query: {err}");
                    parse_failures += 1;
                    continue;
                }
            };
            match positions.get(&fp) {
                Some(&pos) => groups[pos].2 += 1,
                None => {
                    positions.insert(fp.clone(), groups.len());
                    groups.push((fp, query.to_string(), 1));
                }
            }
        }

        let total_queries: u64 = groups.iter().map(|(_, _, count)| count).sum();
        let distinct_templates = groups.len();
        groups.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

        let mut templates = Vec::new();
        let mut running = 0;
        for (fp, sample, count) in groups {
            running += count;
            let cumulative = running as f64 / total_queries as f64;
            if cumulative > coverage + COVERAGE_TOLERANCE {
                break;
            }

            let references = resolve_clause_references(&sample, tables).unwrap_or_else(|err| {
                warn!("Failed to resolve columns of template {fp}: {err}");
                ClauseReferences::default()
            });
            for alias in &references.ambiguous_aliases {
                warn!("Alias {alias} is bound more than once in template {fp}");
            }

            templates.push(QueryTemplate {
                fingerprint: fp,
                sample,
                count,
                fraction: count as f64 / total_queries as f64,
                cumulative,
                references,
            });
        }

        if parse_failures > 0 {
            warn!("{parse_failures} queries could not be parsed and were ignored");
        }
        if templates.is_empty() && total_queries > 0 {
            warn!("No template fits within a workload coverage of {coverage}");
        }
        info!(
            "Aggregated {} queries into {} templates, {} retained",
            total_queries,
            distinct_templates,
            templates.len()
        );

        Ok(Self {
            templates,
            total_queries,
            distinct_templates,
            parse_failures,
            malformed_records: 0,
        })
    }

    pub fn templates(&self) -> &[QueryTemplate] {
        &self.templates
    }

    /// Number of queries that were fingerprinted.
    pub fn total_queries(&self) -> u64 {
        self.total_queries
    }

    pub fn distinct_templates(&self) -> usize {
        self.distinct_templates
    }

    pub fn parse_failures(&self) -> usize {
        self.parse_failures
    }

    pub fn malformed_records(&self) -> usize {
        self.malformed_records
    }

    /// Weighs each template's per-table joint column set by its count.
    pub fn column_references(&self, clauses: &[ClauseKind]) -> ColumnReferenceStats {
        let mut stats = ColumnReferenceStats::default();
        for template in &self.templates {
            for table in &template.references.tables {
                let columns = template.references.columns_for_table(table, clauses);
                stats.add(table, columns, template.count);
            }
        }
        stats
    }
}
