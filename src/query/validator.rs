//! Read-only / known-table gate applied to candidate SQL before execution.
//!
//! This is a heuristic, not a parser. The statement type check looks at the
//! leading keyword only, and the table check is a case-insensitive substring
//! search for any known table name. A candidate that mentions one known
//! table passes even if it also names tables that do not exist; those fail
//! later at execution. Hardening this with a real SQL AST check must keep
//! accepting plain `SELECT ... FROM <known table> ...` statements.

use crate::db::schema_store::Schema;
use thiserror::Error;

/// Prefix the generation layer historically used in place of SQL when a
/// call failed. Candidates carrying it are treated as absent.
pub const FAILURE_SENTINEL: &str = "Error:";

const READ_KEYWORDS: [&str; 2] = ["SELECT", "SHOW"];

/// Why a candidate was refused. Variants are listed in check order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("generation failed")]
    GenerationFailed,
    #[error("disallowed statement type")]
    DisallowedStatement,
    #[error("references unknown table")]
    UnknownTable,
}

/// Returns the trimmed candidate when it may be executed.
///
/// With `schema` absent (schema-less mode) the known-table check is skipped.
pub fn validate<'a>(candidate: Option<&'a str>, schema: Option<&Schema>) -> Result<&'a str, Rejection> {
    let sql = match candidate.map(str::trim) {
        Some(sql) if !sql.is_empty() && !sql.starts_with(FAILURE_SENTINEL) => sql,
        _ => return Err(Rejection::GenerationFailed),
    };

    let leading = sql
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    if !READ_KEYWORDS.iter().any(|kw| leading.eq_ignore_ascii_case(kw)) {
        return Err(Rejection::DisallowedStatement);
    }

    if let Some(schema) = schema {
        let haystack = sql.to_lowercase();
        let known = schema
            .table_names()
            .map(str::trim)
            .filter(|table| !table.is_empty())
            .any(|table| haystack.contains(&table.to_lowercase()));
        if !known {
            return Err(Rejection::UnknownTable);
        }
    }

    Ok(sql)
}
