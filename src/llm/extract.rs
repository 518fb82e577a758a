use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]*[ \t]*\r?\n)?(.*?)```").expect("valid fence pattern"));

// A read statement runs from its keyword to the first `;` or line break.
static READ_STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:SELECT|SHOW)\b[^;`\r\n]*").expect("valid statement pattern"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Pulls the first `SELECT`/`SHOW` statement out of a model completion.
///
/// Fenced code blocks are searched first with their whitespace collapsed, so
/// a statement the model spread over several lines inside ```sql ... ``` is
/// returned whole. Outside a fence the statement ends at the line break.
/// Returns `None` rather than echoing commentary back as SQL.
pub fn extract_sql(completion: &str) -> Option<String> {
    for block in FENCED_BLOCK.captures_iter(completion) {
        let body = WHITESPACE.replace_all(&block[1], " ");
        if let Some(sql) = first_read_statement(&body) {
            debug!("Extracted SQL from fenced block: {}", sql);
            return Some(sql);
        }
    }

    let sql = first_read_statement(completion)?;
    debug!("Extracted SQL: {}", sql);
    Some(sql)
}

fn first_read_statement(text: &str) -> Option<String> {
    READ_STATEMENT
        .find(text)
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_statement_after_leading_chatter() {
        assert_eq!(
            extract_sql("foo SQL: SELECT * FROM x bar").as_deref(),
            Some("SELECT * FROM x bar")
        );
    }

    #[test]
    fn stops_at_line_break_and_semicolon() {
        assert_eq!(
            extract_sql("SELECT name FROM employees\nThis query lists names.").as_deref(),
            Some("SELECT name FROM employees")
        );
        assert_eq!(
            extract_sql("select id from t; -- done").as_deref(),
            Some("select id from t")
        );
    }

    #[test]
    fn show_statements_are_accepted() {
        assert_eq!(extract_sql("Try: show tables").as_deref(), Some("show tables"));
    }

    #[test]
    fn fenced_multi_line_statement_is_joined() {
        let completion = "Here you go:\n```sql\nSELECT name,\n       joined_date\nFROM employees\nWHERE joined_date >= '2022-01-01';\n```\nHope that helps.";
        assert_eq!(
            extract_sql(completion).as_deref(),
            Some("SELECT name, joined_date FROM employees WHERE joined_date >= '2022-01-01'")
        );
    }

    #[test]
    fn inline_fence_without_language_tag() {
        assert_eq!(
            extract_sql("```SELECT * FROM x```").as_deref(),
            Some("SELECT * FROM x")
        );
    }

    #[test]
    fn words_containing_select_do_not_match() {
        assert_eq!(extract_sql("I selected the showroom for you"), None);
    }

    #[test]
    fn commentary_without_sql_is_a_failure() {
        assert_eq!(extract_sql("I am not sure how to answer that."), None);
        assert_eq!(extract_sql("DELETE FROM employees"), None);
        assert_eq!(extract_sql(""), None);
    }
}
