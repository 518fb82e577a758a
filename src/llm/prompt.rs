use crate::db::schema_store::Schema;
use std::fmt::Write;

const PREAMBLE: &str =
    "You are a helpful assistant that generates SQL queries from natural language descriptions.\n\
     Answer with a single read-only SQL statement (SELECT or SHOW).\n";

const EXAMPLES: &str = "Example 1:\n\
     Question: List all employees who joined in 2022.\n\
     SQL: SELECT * FROM employees WHERE join_date BETWEEN '2022-01-01' AND '2022-12-31';\n\n\
     Example 2:\n\
     Question: Find all customers who made a purchase in December 2023.\n\
     SQL: SELECT * FROM customers WHERE purchase_date BETWEEN '2023-12-01' AND '2023-12-31';\n";

/// Renders the few-shot prompt: preamble, schema listing, examples, then
/// the question and the trailing `SQL:` cue. Sections always appear in
/// that order.
pub fn build_prompt(question: &str, schema: Option<&Schema>) -> String {
    let mut prompt = String::from(PREAMBLE);

    match schema {
        Some(schema) if !schema.is_empty() => {
            prompt.push_str("Use only the tables and columns of this database:\n");
            for (table, columns) in schema.tables() {
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                let _ = writeln!(prompt, "Table '{}': Columns ({})", table, names.join(", "));
            }
        }
        _ => {
            prompt.push_str("The database schema is not available; use the table names the question implies.\n");
        }
    }

    prompt.push('\n');
    prompt.push_str(EXAMPLES);
    prompt.push('\n');
    prompt.push_str("Now, convert the following question into an SQL query:\n");
    let _ = write!(prompt, "Question: {}\nSQL:", question);
    prompt
}
