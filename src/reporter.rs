use crate::analysis::{ClauseKind, QueryTemplate, Workload};
use crate::engine::RunReport;
use clap::ValueEnum;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
pub enum ReporterError {
    #[snafu(display("Failed to write output: {}", source))]
    OutputError { source: std::io::Error },

    #[snafu(display("Failed to serialize JSON: {}", source))]
    JsonError { source: serde_json::Error },

    #[snafu(display("Failed to serialize YAML: {}", source))]
    YamlError { source: serde_yaml::Error },
}

type Result<T, E = ReporterError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// JSON document keyed by target
    Json,
    /// YAML document keyed by target
    Yaml,
    /// SQL script, one statement per action
    Sql,
    /// Markdown formatted report
    Markdown,
}

pub struct Reporter {
    format: ReportFormat,
}

impl Reporter {
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }

    pub fn report(&self, report: &RunReport) -> Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.write_report(&mut handle, report)
    }

    pub fn write_report<W: Write>(&self, out: &mut W, report: &RunReport) -> Result<()> {
        match self.format {
            ReportFormat::Json => {
                let json =
                    serde_json::to_string_pretty(&report.catalog.export()).context(JsonSnafu)?;
                writeln!(out, "{}", json).context(OutputSnafu)?;
            }
            ReportFormat::Yaml => {
                let yaml = serde_yaml::to_string(&report.catalog.export()).context(YamlSnafu)?;
                write!(out, "{}", yaml).context(OutputSnafu)?;
            }
            ReportFormat::Sql => self.write_sql(out, report)?,
            ReportFormat::Markdown => self.write_markdown(out, report)?,
        }
        Ok(())
    }

    fn write_sql<W: Write>(&self, out: &mut W, report: &RunReport) -> Result<()> {
        for entry in report.catalog.entries() {
            writeln!(out, "-- {}", entry.target).context(OutputSnafu)?;
            for action in &entry.actions {
                writeln!(out, "{}", action).context(OutputSnafu)?;
            }
            writeln!(out).context(OutputSnafu)?;
        }
        Ok(())
    }

    fn write_markdown<W: Write>(&self, out: &mut W, report: &RunReport) -> Result<()> {
        let catalog = &report.catalog;

        writeln!(out, "# Tuning Action Catalog\n").context(OutputSnafu)?;

        // Summary
        writeln!(out, "## Summary\n").context(OutputSnafu)?;
        writeln!(out, "- **Targets**: {}", catalog.target_count()).context(OutputSnafu)?;
        writeln!(out, "- **Actions**: {}", catalog.action_count()).context(OutputSnafu)?;
        for (kind, count) in catalog.counts_by_kind() {
            writeln!(out, "  - `{}`: {}", kind.as_str(), count).context(OutputSnafu)?;
        }
        writeln!(out).context(OutputSnafu)?;

        if !report.failures.is_empty() {
            writeln!(out, "## Skipped Generators\n").context(OutputSnafu)?;
            for failure in &report.failures {
                writeln!(out, "- **{}**: {}", failure.generator, failure.error)
                    .context(OutputSnafu)?;
            }
            writeln!(out).context(OutputSnafu)?;
        }

        if !report.diagnostics.is_empty() {
            writeln!(out, "## Diagnostics\n").context(OutputSnafu)?;
            writeln!(out, "| Generator | Message |").context(OutputSnafu)?;
            writeln!(out, "|-----------|---------|").context(OutputSnafu)?;
            for diagnostic in &report.diagnostics {
                writeln!(out, "| {} | {} |", diagnostic.generator, diagnostic.message)
                    .context(OutputSnafu)?;
            }
            writeln!(out).context(OutputSnafu)?;
        }

        writeln!(out, "## Actions\n").context(OutputSnafu)?;
        if catalog.is_empty() {
            writeln!(out, "No actions were generated.").context(OutputSnafu)?;
            return Ok(());
        }
        for entry in catalog.entries() {
            writeln!(out, "### `{}`\n", entry.target).context(OutputSnafu)?;
            writeln!(out, "```sql").context(OutputSnafu)?;
            for action in &entry.actions {
                writeln!(out, "{}", action).context(OutputSnafu)?;
            }
            writeln!(out, "```\n").context(OutputSnafu)?;
        }

        Ok(())
    }
}

#[derive(Serialize)]
struct TemplateSummary<'a> {
    total_queries: u64,
    distinct_templates: usize,
    parse_failures: usize,
    malformed_records: usize,
    templates: &'a [QueryTemplate],
}

/// Renders the retained templates of a workload.
pub struct TemplateReporter {
    format: ReportFormat,
    limit: Option<usize>,
}

impl TemplateReporter {
    pub fn new(format: ReportFormat, limit: Option<usize>) -> Self {
        Self { format, limit }
    }

    pub fn report(&self, workload: &Workload) -> Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.write_report(&mut handle, workload)
    }

    pub fn write_report<W: Write>(&self, out: &mut W, workload: &Workload) -> Result<()> {
        let templates = workload.templates();
        let shown = &templates[..self.limit.unwrap_or(templates.len()).min(templates.len())];
        let summary = TemplateSummary {
            total_queries: workload.total_queries(),
            distinct_templates: workload.distinct_templates(),
            parse_failures: workload.parse_failures(),
            malformed_records: workload.malformed_records(),
            templates: shown,
        };

        match self.format {
            ReportFormat::Json => {
                let json = serde_json::to_string_pretty(&summary).context(JsonSnafu)?;
                writeln!(out, "{}", json).context(OutputSnafu)?;
            }
            ReportFormat::Yaml => {
                let yaml = serde_yaml::to_string(&summary).context(YamlSnafu)?;
                write!(out, "{}", yaml).context(OutputSnafu)?;
            }
            ReportFormat::Sql => {
                for template in shown {
                    writeln!(
                        out,
                        "-- {} ({} occurrences, {:.1}% of workload)",
                        template.fingerprint,
                        template.count,
                        template.fraction * 100.0
                    )
                    .context(OutputSnafu)?;
                    writeln!(out, "{};\n", template.sample.trim_end_matches(';'))
                        .context(OutputSnafu)?;
                }
            }
            ReportFormat::Markdown => self.write_markdown(out, &summary)?,
        }
        Ok(())
    }

    fn write_markdown<W: Write>(&self, out: &mut W, summary: &TemplateSummary<'_>) -> Result<()> {
        writeln!(out, "# Workload Templates\n").context(OutputSnafu)?;
        writeln!(out, "- **Queries**: {}", summary.total_queries).context(OutputSnafu)?;
        writeln!(out, "- **Distinct templates**: {}", summary.distinct_templates)
            .context(OutputSnafu)?;
        writeln!(out, "- **Unparseable queries**: {}", summary.parse_failures)
            .context(OutputSnafu)?;
        writeln!(out, "- **Malformed log records**: {}\n", summary.malformed_records)
            .context(OutputSnafu)?;

        writeln!(out, "| # | Count | Share | Cumulative | Fingerprint | Columns |")
            .context(OutputSnafu)?;
        writeln!(out, "|---|-------|-------|------------|-------------|---------|")
            .context(OutputSnafu)?;
        for (rank, template) in summary.templates.iter().enumerate() {
            writeln!(
                out,
                "| {} | {} | {:.1}% | {:.1}% | `{}` | {} |",
                rank + 1,
                template.count,
                template.fraction * 100.0,
                template.cumulative * 100.0,
                template.fingerprint,
                describe_columns(template)
            )
            .context(OutputSnafu)?;
        }
        writeln!(out).context(OutputSnafu)?;

        for (rank, template) in summary.templates.iter().enumerate() {
            writeln!(out, "### {}. `{}`\n", rank + 1, template.fingerprint)
                .context(OutputSnafu)?;
            writeln!(out, "```sql\n{}\n```\n", template.sample).context(OutputSnafu)?;
        }

        Ok(())
    }
}

fn describe_columns(template: &QueryTemplate) -> String {
    let parts: Vec<String> = ClauseKind::ALL
        .iter()
        .filter_map(|kind| {
            let columns = template.references.clause(*kind);
            if columns.is_empty() {
                return None;
            }
            let names: Vec<String> = columns
                .iter()
                .map(|c| format!("{}.{}", c.table, c.column))
                .collect();
            Some(format!("{}: {}", kind.as_str(), names.join(", ")))
        })
        .collect();

    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join("; ")
    }
}
