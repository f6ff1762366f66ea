use rand::seq::index;
use rand::Rng;
use regex::Regex;
use snafu::{ResultExt, Snafu};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

/// Zero-based position of the `message` field in a PostgreSQL csvlog record.
const CSV_MESSAGE_COLUMN: usize = 13;

// Simple protocol: "statement: SELECT ..."; extended protocol: "execute <name>: SELECT ...".
static QUERY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?:statement: |execute [^:]+: )((?:DELETE|INSERT|SELECT|UPDATE)\b.*)")
        .expect("valid regex")
});

#[derive(Debug, Snafu)]
pub enum LogError {
    #[snafu(display("Failed to open query log {}: {}", path, source))]
    Open {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// PostgreSQL `csvlog` output.
    Csv,
    /// `stderr` style output, one message per line.
    Plain,
}

impl LogFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => LogFormat::Csv,
            _ => LogFormat::Plain,
        }
    }
}

/// Queries pulled out of a log, plus how many records could not be read.
#[derive(Debug, Clone, Default)]
pub struct ExtractedLog {
    pub queries: Vec<String>,
    pub malformed_records: usize,
}

impl ExtractedLog {
    /// Picks up to `size` queries without replacement, kept in log order.
    pub fn sample<R: Rng + ?Sized>(&self, size: usize, rng: &mut R) -> Vec<&str> {
        let size = size.min(self.queries.len());
        let mut picked = index::sample(rng, self.queries.len(), size).into_vec();
        picked.sort_unstable();
        picked
            .into_iter()
            .map(|i| self.queries[i].as_str())
            .collect()
    }
}

/// Returns the SQL statement embedded in a log message, if any.
pub fn extract_query(message: &str) -> Option<String> {
    let captures = QUERY_REGEX.captures(message)?;
    let query = captures.get(1)?.as_str().trim();
    (!query.is_empty()).then(|| query.to_string())
}

pub fn read_query_log(path: &Path) -> Result<ExtractedLog, LogError> {
    let file = File::open(path).context(OpenSnafu {
        path: path.display().to_string(),
    })?;

    let extracted = match LogFormat::from_path(path) {
        LogFormat::Csv => extract_from_csv(file),
        LogFormat::Plain => extract_from_lines(BufReader::new(file)),
    };

    debug!(
        "Extracted {} queries from {} ({} malformed records)",
        extracted.queries.len(),
        path.display(),
        extracted.malformed_records
    );
    Ok(extracted)
}

pub fn extract_from_csv<R: Read>(reader: R) -> ExtractedLog {
    let mut extracted = ExtractedLog::default();
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    for record in csv_reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                debug!("Skipping malformed log record: {err}");
                extracted.malformed_records += 1;
                continue;
            }
        };

        let Some(message) = record.get(CSV_MESSAGE_COLUMN) else {
            extracted.malformed_records += 1;
            continue;
        };
        if message.is_empty() {
            continue;
        }
        if let Some(query) = extract_query(message) {
            extracted.queries.push(query);
        }
    }

    extracted
}

pub fn extract_from_lines<R: BufRead>(reader: R) -> ExtractedLog {
    let mut extracted = ExtractedLog::default();
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if let Some(query) = extract_query(&line) {
                    extracted.queries.push(query);
                }
            }
            Err(_) => extracted.malformed_records += 1,
        }
    }
    extracted
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn csv_line(message: &str) -> String {
        let quoted = format!("\"{}\"", message.replace('"', "\"\""));
        format!(
            "2024-01-01 00:00:00 UTC,app,shop,42,127.0.0.1:5000,abc.1,1,SELECT,2024-01-01 00:00:00 UTC,3/4,0,LOG,00000,{quoted},,,,,,,,,psql,client backend\n"
        )
    }

    #[rstest]
    #[case("statement: SELECT * FROM orders", Some("SELECT * FROM orders"))]
    #[case("execute <unnamed>: select id from orders where id = $1", Some("select id from orders where id = $1"))]
    #[case("execute S_1: UPDATE orders SET status = 'x'", Some("UPDATE orders SET status = 'x'"))]
    #[case("statement: BEGIN", None)]
    #[case("statement: COMMIT", None)]
    #[case("duration: 0.123 ms", None)]
    #[case("connection authorized: user=app", None)]
    fn extracts_statements(#[case] message: &str, #[case] expected: Option<&str>) {
        assert_eq!(extract_query(message).as_deref(), expected);
    }

    #[test]
    fn keeps_multi_line_statements() {
        let query = extract_query("statement: SELECT *\nFROM orders\nWHERE id = 1").unwrap();
        assert_eq!(query, "SELECT *\nFROM orders\nWHERE id = 1");
    }

    #[test]
    fn reads_csvlog_messages() {
        let mut log = String::new();
        log.push_str(&csv_line("statement: SELECT * FROM orders WHERE id = 1"));
        log.push_str(&csv_line("statement: BEGIN"));
        log.push_str(&csv_line("execute <unnamed>: SELECT \"name\" FROM customers"));
        log.push_str(&csv_line(""));

        let extracted = extract_from_csv(log.as_bytes());
        assert_eq!(
            extracted.queries,
            vec![
                "SELECT * FROM orders WHERE id = 1",
                "SELECT \"name\" FROM customers"
            ]
        );
        assert_eq!(extracted.malformed_records, 0);
    }

    #[test]
    fn short_records_are_counted_not_fatal() {
        let log = format!("a,b,c\n{}", csv_line("statement: DELETE FROM orders"));
        let extracted = extract_from_csv(log.as_bytes());
        assert_eq!(extracted.queries, vec!["DELETE FROM orders"]);
        assert_eq!(extracted.malformed_records, 1);
    }

    #[test]
    fn reads_plain_log_lines() {
        let log = "2024-01-01 LOG:  statement: SELECT 1\n2024-01-01 LOG:  checkpoint starting\n";
        let extracted = extract_from_lines(log.as_bytes());
        assert_eq!(extracted.queries, vec!["SELECT 1"]);
    }

    #[test]
    fn sample_is_a_seeded_subset_in_log_order() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let extracted = ExtractedLog {
            queries: (0..20).map(|i| format!("SELECT {i}")).collect(),
            malformed_records: 0,
        };
        let first = extracted.sample(5, &mut StdRng::seed_from_u64(7));
        let second = extracted.sample(5, &mut StdRng::seed_from_u64(7));
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);

        let positions: Vec<usize> = first
            .iter()
            .map(|q| extracted.queries.iter().position(|e| e == q).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn oversized_sample_returns_every_query() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let log = "LOG:  statement: SELECT 1\nLOG:  statement: SELECT 2\n";
        let extracted = extract_from_lines(log.as_bytes());
        assert_eq!(
            extracted.sample(500, &mut StdRng::seed_from_u64(1)),
            vec!["SELECT 1", "SELECT 2"]
        );
    }

    #[test]
    fn detects_format_from_extension() {
        assert_eq!(LogFormat::from_path(Path::new("pg.csv")), LogFormat::Csv);
        assert_eq!(LogFormat::from_path(Path::new("pg.log")), LogFormat::Plain);
    }
}
