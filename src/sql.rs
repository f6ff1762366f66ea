use crate::models::{Action, ParamValue};
use sqlparser::ast::Ident;

/// Renders an action as a single PostgreSQL statement.
pub fn render(action: &Action) -> String {
    match action {
        Action::CreateIndex { target } => {
            let columns: Vec<String> = target.columns().iter().map(|c| ident(c)).collect();
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING {} ({});",
                ident(&target.index_name()),
                ident(target.table()),
                ident(target.access_method()),
                columns.join(", ")
            )
        }
        Action::DropIndex { target, cascade } => format!(
            "DROP INDEX IF EXISTS {}{};",
            ident(&target.index_name()),
            if *cascade { " CASCADE" } else { "" }
        ),
        Action::SetParameter {
            target,
            value,
            alter_system,
        } => {
            let setting = value.as_ref().map(literal).unwrap_or_else(|| "DEFAULT".into());
            let prefix = if *alter_system { "ALTER SYSTEM " } else { "" };
            format!("{prefix}SET {} TO {setting};", ident(target.name()))
        }
    }
}

fn literal(value: &ParamValue) -> String {
    match value {
        ParamValue::Int(_) | ParamValue::Float(_) => value.to_string(),
        ParamValue::Bool(_) | ParamValue::Text(_) => {
            format!("'{}'", value.to_string().replace('\'', "''"))
        }
    }
}

fn ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$');

    if plain {
        Ident::new(name).to_string()
    } else {
        Ident::with_quote('"', name).to_string()
    }
}
