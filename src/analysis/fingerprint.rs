use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlparser::ast::{visit_expressions_mut, Expr, UnaryOperator, Value};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::{Parser, ParserError};
use std::fmt;
use std::ops::ControlFlow;

const FINGERPRINT_HEX_LEN: usize = 16;

/// Structural identity of a query: equal for queries that differ only in
/// literal values, placeholders, whitespace or keyword case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(query: &str) -> Result<Fingerprint, ParserError> {
    let normalized = normalize(query)?;
    let digest = Sha256::digest(normalized.as_bytes());
    let hex = format!("{digest:x}");
    Ok(Fingerprint(hex[..FINGERPRINT_HEX_LEN].to_string()))
}

/// Renders the query with every constant replaced by `?`.
pub fn normalize(query: &str) -> Result<String, ParserError> {
    let dialect = PostgreSqlDialect {};
    let mut statements = Parser::parse_sql(&dialect, query)?;
    if statements.is_empty() {
        return Err(ParserError::ParserError("empty query".into()));
    }

    let _ = visit_expressions_mut(&mut statements, |expr| {
        mask_constants(expr);
        ControlFlow::<()>::Continue(())
    });

    Ok(statements
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; "))
}

// Runs bottom-up, so children are already masked when a parent is visited.
fn mask_constants(expr: &mut Expr) {
    let negated_constant = matches!(
        &*expr,
        Expr::UnaryOp { op: UnaryOperator::Minus, expr: inner } if matches!(**inner, Expr::Value(_))
    );
    if negated_constant {
        *expr = masked();
        return;
    }

    match expr {
        Expr::Value(value) => *value = Value::Placeholder("?".to_string()),
        Expr::InList { list, .. } if list.iter().all(|item| matches!(item, Expr::Value(_))) => {
            list.truncate(1);
        }
        _ => {}
    }
}

fn masked() -> Expr {
    Expr::Value(Value::Placeholder("?".to_string()))
}
