use crate::db::Row;
use crate::schema::format::format_table;
use crate::schema::TableSchema;
use crate::sql::mappings::{CANONICAL_TABLES, DATE_FORMAT, TABLE_NAME_FIXES};
use std::collections::BTreeMap;
use std::fmt::Write;

pub const DEFAULT_LIMIT: usize = 1000;
const SUMMARY_SAMPLE_ROWS: usize = 5;

/// Builds the SQL generation prompt for `question`.
///
/// Sections appear in a fixed order: role, table list, naming rules,
/// per-table field listings, query rules, then the question itself. The
/// output depends only on the arguments, so two calls with the same input
/// produce the same bytes.
pub fn build_sql_prompt(
    question: &str,
    schemas: &BTreeMap<String, TableSchema>,
    dataset: &str,
) -> String {
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are a healthcare data analyst expert. Convert the following natural language question into a BigQuery SQL query."
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Available dataset: {}", dataset);
    let _ = writeln!(prompt);

    write_table_list(&mut prompt);
    write_naming_rules(&mut prompt);
    write_schemas(&mut prompt, schemas);
    write_query_rules(&mut prompt);

    let _ = writeln!(prompt, "Natural language question: {}", question.trim());
    let _ = writeln!(prompt);
    let _ = write!(prompt, "SQL Query:");
    prompt
}

fn write_table_list(prompt: &mut String) {
    let _ = writeln!(prompt, "Key tables and their purposes (use EXACT table names as shown):");
    for (table, purpose) in CANONICAL_TABLES {
        let _ = writeln!(prompt, "- {}: {}", table, purpose);
    }
    let _ = writeln!(prompt);
}

fn write_naming_rules(prompt: &mut String) {
    let canonical: Vec<&str> = CANONICAL_TABLES.iter().map(|(name, _)| *name).collect();
    let pascal: Vec<&str> = TABLE_NAME_FIXES
        .iter()
        .map(|(wrong, _)| *wrong)
        .filter(|wrong| wrong.starts_with(|c: char| c.is_ascii_uppercase()))
        .collect();
    let camel: Vec<&str> = TABLE_NAME_FIXES
        .iter()
        .map(|(wrong, _)| *wrong)
        .filter(|wrong| wrong.starts_with(|c: char| c.is_ascii_lowercase()))
        .collect();

    let _ = writeln!(prompt, "CRITICAL TABLE NAME REQUIREMENTS:");
    let _ = writeln!(prompt, "- Use EXACT table names: {}", canonical.join(", "));
    let _ = writeln!(prompt, "- Do NOT use PascalCase like {}", pascal.join(", "));
    let _ = writeln!(prompt, "- Do NOT use camelCase like {}", camel.join(", "));
    let _ = writeln!(
        prompt,
        "- Always use lowercase with underscores: medication_request (NOT MedicationRequest, NOT medicationRequest)"
    );
    let _ = writeln!(prompt);
}

fn write_schemas(prompt: &mut String, schemas: &BTreeMap<String, TableSchema>) {
    if schemas.is_empty() {
        return;
    }

    let _ = writeln!(prompt, "ACTUAL TABLE SCHEMAS (use these exact field names):");
    for schema in schemas.values() {
        let _ = writeln!(prompt);
        prompt.push_str(&format_table(schema));
    }
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "CRITICAL SCHEMA RULES:");
    let _ = writeln!(prompt, "- Use ONLY the field names listed above");
    let _ = writeln!(prompt, "- NEVER reference fields that are not in the schema");
    let _ = writeln!(
        prompt,
        "- For RECORD fields, only use the nested fields that actually exist"
    );
    let _ = writeln!(
        prompt,
        "- If you need a record ID, use the top-level 'id' field, not RECORD.id"
    );
    let _ = writeln!(prompt);
}

fn write_query_rules(prompt: &mut String) {
    let _ = writeln!(prompt, "IMPORTANT DATA TYPE NOTES:");
    let _ = writeln!(
        prompt,
        "- Date fields in this dataset are stored as STRING type, not DATE type"
    );
    let _ = writeln!(
        prompt,
        "- Before EXTRACT() or any comparison on a date field, convert it with PARSE_DATE()"
    );
    let _ = writeln!(
        prompt,
        "- For EXTRACT operations, use: EXTRACT(YEAR FROM PARSE_DATE('{}', date_field))",
        DATE_FORMAT
    );
    let _ = writeln!(
        prompt,
        "- For date comparisons, use: PARSE_DATE('{}', date_field) >= DATE('2020-01-01')",
        DATE_FORMAT
    );
    let _ = writeln!(prompt);

    let _ = writeln!(prompt, "Guidelines:");
    let _ = writeln!(prompt, "1. Use proper BigQuery SQL syntax");
    let _ = writeln!(
        prompt,
        "2. Always include exactly ONE LIMIT clause (use LIMIT {} if not specified in the question)",
        DEFAULT_LIMIT
    );
    let _ = writeln!(prompt, "3. Use appropriate JOINs when needed");
    let _ = writeln!(
        prompt,
        "4. For questions like \"list\" or \"what are\", use SELECT DISTINCT to avoid duplicate rows"
    );
    let _ = writeln!(
        prompt,
        "5. For \"how many\" questions, count unique records with COUNT(DISTINCT id)"
    );
    let _ = writeln!(prompt, "6. Use descriptive column aliases");
    let _ = writeln!(
        prompt,
        "7. Return ONLY the SQL query itself, no explanations, no markdown formatting or code blocks"
    );
    let _ = writeln!(prompt);
}

/// Builds the prompt for the result summary call from a sample of `rows`.
pub fn build_summary_prompt(question: &str, rows: &[Row], sql: &str) -> String {
    let sample = &rows[..rows.len().min(SUMMARY_SAMPLE_ROWS)];
    let sample_json = serde_json::to_string_pretty(sample).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"You are a healthcare data analyst. Provide a clear, concise summary of the query results.

Original question: {}
SQL query used: {}
Number of results: {}

Sample data:
{}

Provide a 2-3 sentence summary that:
1. Answers the original question
2. Highlights key findings or patterns
3. Uses healthcare terminology appropriately

Summary:"#,
        question.trim(),
        sql,
        rows.len(),
        sample_json
    )
}
