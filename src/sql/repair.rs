//! Turns a free-text model response into one executable statement.
//!
//! The generator is not trusted: it wraps SQL in markdown, miscases table
//! names, invents field names and assumes every nested record has an `id`.
//! Each [`RepairPass`] compensates for one of those habits with a purely
//! textual rewrite. Passes run in the order of [`REPAIR_PASSES`], every pass
//! is idempotent, and none of them can fail.

use crate::sql::mappings::{
    date_field_tokens, DATE_FORMAT, ENUMERATION_HINTS, FIELD_NAME_FIXES, NESTED_ID_FIXES,
    RECORD_ID_FIELD, TABLE_FIELD_ALIASES, TABLE_NAME_FIXES,
};
use regex::{Captures, NoExpand, Regex};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

pub struct RepairPass {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

pub const REPAIR_PASSES: &[RepairPass] = &[
    RepairPass { name: "extract_statement", apply: extract_statement },
    RepairPass { name: "normalize_terminator", apply: normalize_terminator },
    RepairPass { name: "parse_string_dates", apply: repair_date_extraction },
    RepairPass { name: "table_name_casing", apply: repair_table_casing },
    RepairPass { name: "field_names", apply: repair_field_names },
    RepairPass { name: "nested_field_ids", apply: repair_nested_ids },
    RepairPass { name: "duplicate_suppression", apply: suppress_duplicates },
];

/// Runs every repair pass over `raw_response` and returns the statement.
pub fn extract_and_repair_sql(raw_response: &str) -> String {
    REPAIR_PASSES
        .iter()
        .fold(raw_response.to_string(), |sql, pass| {
            let repaired = (pass.apply)(&sql);
            if repaired != sql {
                debug!("Repair pass '{}' rewrote statement: {}", pass.name, repaired);
            }
            repaired
        })
}

// Stage 1: fences and labels

static SQL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```sql\s+(.*?)```").unwrap());
static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:[\w+-]*[ \t]*\r?\n)?(.*?)```").unwrap());
static LEADING_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:SQL\s*Query|Query|SQL)\s*:\s*").unwrap());

pub fn extract_statement(response: &str) -> String {
    let trimmed = response.trim();
    let body = SQL_FENCE
        .captures(trimmed)
        .or_else(|| ANY_FENCE.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str())
        .trim();

    let mut statement = body;
    while let Some(label) = LEADING_LABEL.find(statement) {
        statement = statement[label.end()..].trim_start();
    }
    statement.to_string()
}

// Stage 2: exactly one terminator

pub fn normalize_terminator(sql: &str) -> String {
    let body = sql
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .trim_start();
    format!("{};", body)
}

// Stage 3: STRING dates inside EXTRACT

static DATE_EXTRACTIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    date_field_tokens()
        .into_iter()
        .map(|field| {
            Regex::new(&format!(
                r"(?i)\bEXTRACT\s*\(\s*(?P<part>[^,()]+?)\s+FROM\s+(?P<field>(?:\w+\.)?{})\s*\)",
                regex::escape(field)
            ))
            .unwrap()
        })
        .collect()
});

pub fn repair_date_extraction(sql: &str) -> String {
    DATE_EXTRACTIONS.iter().fold(sql.to_string(), |sql, pattern| {
        pattern
            .replace_all(&sql, |caps: &Captures| {
                format!(
                    "EXTRACT({} FROM PARSE_DATE('{}', {}))",
                    caps["part"].trim(),
                    DATE_FORMAT,
                    &caps["field"]
                )
            })
            .into_owned()
    })
}

// Stage 4: table casing

struct TableCasingRule {
    quoted: Regex,
    qualified: Regex,
    unqualified: Regex,
    correct: &'static str,
}

static TABLE_CASING: LazyLock<Vec<TableCasingRule>> = LazyLock::new(|| {
    TABLE_NAME_FIXES
        .iter()
        .map(|(wrong, correct)| {
            let wrong = regex::escape(wrong);
            TableCasingRule {
                quoted: Regex::new(&format!(r"`(?P<prefix>[^`]*\.){}`", wrong)).unwrap(),
                qualified: Regex::new(&format!(
                    r"(?P<prefix>[^`\s]*\.){}(?P<end>[\s,;)]|$)",
                    wrong
                ))
                .unwrap(),
                unqualified: Regex::new(&format!(
                    r"(?P<prefix>\b(?i:FROM|JOIN)\s+){}(?P<end>[\s,;)]|$)",
                    wrong
                ))
                .unwrap(),
                correct,
            }
        })
        .collect()
});

pub fn repair_table_casing(sql: &str) -> String {
    TABLE_CASING.iter().fold(sql.to_string(), |sql, rule| {
        let sql = rule
            .quoted
            .replace_all(&sql, |caps: &Captures| {
                format!("`{}{}`", &caps["prefix"], rule.correct)
            })
            .into_owned();
        let sql = rule
            .qualified
            .replace_all(&sql, |caps: &Captures| {
                format!("{}{}{}", &caps["prefix"], rule.correct, &caps["end"])
            })
            .into_owned();
        rule.unqualified
            .replace_all(&sql, |caps: &Captures| {
                format!("{}{}{}", &caps["prefix"], rule.correct, &caps["end"])
            })
            .into_owned()
    })
}

// Stage 5: field names

fn whole_token(token: &str) -> Regex {
    Regex::new(&format!(r"\b{}\b", regex::escape(token))).unwrap()
}

static FIELD_FIXES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    FIELD_NAME_FIXES
        .iter()
        .map(|(wrong, correct)| (whole_token(wrong), *correct))
        .collect()
});

static TABLE_ALIAS_FIXES: LazyLock<Vec<(&'static str, Regex, &'static str)>> =
    LazyLock::new(|| {
        TABLE_FIELD_ALIASES
            .iter()
            .map(|alias| (alias.table, whole_token(alias.token), alias.replacement))
            .collect()
    });

static TABLE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:FROM|JOIN)\s+`?(?:[\w-]+\.)*(?P<table>\w+)`?").unwrap()
});

/// Lowercased names of the tables a statement reads from.
pub fn referenced_tables(sql: &str) -> HashSet<String> {
    TABLE_REFERENCE
        .captures_iter(sql)
        .map(|caps| caps["table"].to_lowercase())
        .collect()
}

pub fn repair_field_names(sql: &str) -> String {
    let mut sql = FIELD_FIXES.iter().fold(sql.to_string(), |sql, (pattern, correct)| {
        pattern.replace_all(&sql, NoExpand(*correct)).into_owned()
    });

    let tables = referenced_tables(&sql);
    for (table, pattern, replacement) in TABLE_ALIAS_FIXES.iter() {
        if tables.contains(*table) {
            sql = pattern.replace_all(&sql, NoExpand(*replacement)).into_owned();
        }
    }
    sql
}

// Stage 6: nested `.id` that does not exist

static NESTED_FIXES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    NESTED_ID_FIXES
        .iter()
        .map(|(wrong, correct)| (whole_token(wrong), *correct))
        .collect()
});

static SELECT_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSELECT\s+").unwrap());
static LEADING_DISTINCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^DISTINCT\s+").unwrap());
static DOTTED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_]\w*(?:\[\d+\])?(?:\.[A-Za-z_]\w*(?:\[\d+\])?)+$").unwrap()
});

pub fn repair_nested_ids(sql: &str) -> String {
    let sql = NESTED_FIXES.iter().fold(sql.to_string(), |sql, (pattern, correct)| {
        pattern.replace_all(&sql, NoExpand(*correct)).into_owned()
    });
    replace_nested_id_selects(&sql)
}

/// True for dotted paths such as `code.id` or `e.serviceProvider.id`.
fn is_nested_id_path(item: &str) -> bool {
    let item = LEADING_DISTINCT.replace(item.trim(), "");
    let Some(expr) = item.split_whitespace().next() else {
        return false;
    };
    DOTTED_PATH.is_match(expr) && expr.ends_with(&format!(".{}", RECORD_ID_FIELD))
}

fn replace_nested_id_selects(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut cursor = 0;

    for select in SELECT_KEYWORD.find_iter(sql) {
        if select.start() < cursor {
            continue;
        }
        let list_start = select.end();
        let list_end = select_list_end(sql, list_start);
        let list = sql[list_start..list_end].trim_end();

        if split_top_level(list, b',').into_iter().any(is_nested_id_path) {
            result.push_str(&sql[cursor..list_start]);
            if LEADING_DISTINCT.is_match(list) {
                result.push_str("DISTINCT ");
            }
            result.push_str(RECORD_ID_FIELD);
            cursor = list_start + list.len();
        }
    }

    result.push_str(&sql[cursor..]);
    result
}

// Stage 7: duplicate suppression

static DISTINCT_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDISTINCT\b").unwrap());
static GROUP_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap());
static COUNT_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCOUNT\s*\(\s*\*\s*\)").unwrap());
static AGGREGATE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:COUNT|SUM|AVG|MIN|MAX)\s*\(").unwrap());

pub fn suppress_duplicates(sql: &str) -> String {
    if DISTINCT_KEYWORD.is_match(sql) || GROUP_BY.is_match(sql) {
        return sql.to_string();
    }
    // Any aggregate other than COUNT(*) leaves the statement alone.
    let count_stars = COUNT_STAR.find_iter(sql).count();
    if AGGREGATE_CALL.find_iter(sql).count() > count_stars {
        return sql.to_string();
    }
    if count_stars > 0 {
        let distinct_count = format!("COUNT(DISTINCT {})", RECORD_ID_FIELD);
        return COUNT_STAR
            .replace_all(sql, NoExpand(&distinct_count))
            .into_owned();
    }

    let Some(select) = SELECT_KEYWORD.find(sql) else {
        return sql.to_string();
    };
    let list = sql[select.end()..select_list_end(sql, select.end())].to_lowercase();
    if !ENUMERATION_HINTS.iter().any(|hint| list.contains(hint)) {
        return sql.to_string();
    }

    let mut result = String::with_capacity(sql.len() + 9);
    result.push_str(&sql[..select.end()]);
    result.push_str("DISTINCT ");
    result.push_str(&sql[select.end()..]);
    result
}

// Clause scanning shared by stages 6 and 7

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn keyword_at(bytes: &[u8], i: usize, keyword: &str) -> bool {
    let end = i + keyword.len();
    end <= bytes.len()
        && bytes[i..end].eq_ignore_ascii_case(keyword.as_bytes())
        && (i == 0 || !is_word_byte(bytes[i - 1]))
        && (end == bytes.len() || !is_word_byte(bytes[end]))
}

/// Byte offset where the select list starting at `start` ends: the first
/// `FROM`, `;` or unbalanced `)` outside parentheses and quotes.
fn select_list_end(sql: &str, start: usize) -> usize {
    let bytes = sql.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;

    for i in start..bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' => depth += 1,
            b')' if depth == 0 => return i,
            b')' => depth -= 1,
            b';' if depth == 0 => return i,
            _ if depth == 0 && keyword_at(bytes, i, "FROM") => return i,
            _ => {}
        }
    }
    bytes.len()
}

fn split_top_level(text: &str, separator: u8) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0;

    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            _ if b == separator && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sql_fenced_block() {
        let response = "Here you go:\n```sql\nSELECT id FROM patient\n```\nAnything else?";
        assert_eq!(extract_statement(response), "SELECT id FROM patient");
    }

    #[test]
    fn prefers_sql_fence_over_earlier_plain_fence() {
        let response = "```\nnot this\n```\n```SQL\nSELECT 1\n```";
        assert_eq!(extract_statement(response), "SELECT 1");
    }

    #[test]
    fn falls_back_to_any_fence() {
        assert_eq!(extract_statement("```\nSELECT 2\n```"), "SELECT 2");
        assert_eq!(
            extract_statement("```bigquery\nSELECT 3\n```"),
            "SELECT 3"
        );
        assert_eq!(extract_statement("```SELECT 4```"), "SELECT 4");
    }

    #[test]
    fn strips_leading_labels() {
        assert_eq!(extract_statement("SQL Query: SELECT 1"), "SELECT 1");
        assert_eq!(extract_statement("query:\nSELECT 1"), "SELECT 1");
        assert_eq!(extract_statement("sql: SELECT 1"), "SELECT 1");
        assert_eq!(extract_statement("  SELECT 1  "), "SELECT 1");
    }

    #[test]
    fn terminator_is_always_single() {
        assert_eq!(normalize_terminator("SELECT 1"), "SELECT 1;");
        assert_eq!(normalize_terminator("SELECT 1;"), "SELECT 1;");
        assert_eq!(normalize_terminator("SELECT 1;;; \n"), "SELECT 1;");
        assert_eq!(normalize_terminator("SELECT 1; ;"), "SELECT 1;");
        assert_eq!(normalize_terminator(""), ";");
    }

    #[test]
    fn wraps_string_dates_in_parse_date() {
        assert_eq!(
            repair_date_extraction("SELECT EXTRACT(YEAR FROM birthDate) FROM patient;"),
            "SELECT EXTRACT(YEAR FROM PARSE_DATE('%Y-%m-%d', birthDate)) FROM patient;"
        );
        assert_eq!(
            repair_date_extraction("SELECT extract( month from c.assertedDate ) FROM condition c;"),
            "SELECT EXTRACT(month FROM PARSE_DATE('%Y-%m-%d', c.assertedDate)) FROM condition c;"
        );
    }

    #[test]
    fn leaves_unknown_and_wrapped_dates_alone() {
        let typed = "SELECT EXTRACT(YEAR FROM authoredOn) FROM medication_request;";
        assert_eq!(repair_date_extraction(typed), typed);

        let wrapped = "SELECT EXTRACT(YEAR FROM PARSE_DATE('%Y-%m-%d', birthDate)) FROM patient;";
        assert_eq!(repair_date_extraction(wrapped), wrapped);

        let longer = "SELECT EXTRACT(YEAR FROM startDate) FROM t;";
        assert_eq!(repair_date_extraction(longer), longer);
    }

    #[test]
    fn fixes_quoted_table_casing() {
        assert_eq!(
            repair_table_casing(
                "SELECT * FROM `bigquery-public-data.fhir_synthea.MedicationRequest` LIMIT 5;"
            ),
            "SELECT * FROM `bigquery-public-data.fhir_synthea.medication_request` LIMIT 5;"
        );
    }

    #[test]
    fn fixes_bare_table_casing() {
        assert_eq!(
            repair_table_casing("SELECT * FROM fhir.Patient p JOIN fhir.Encounter e ON true;"),
            "SELECT * FROM fhir.patient p JOIN fhir.encounter e ON true;"
        );
        assert_eq!(
            repair_table_casing("SELECT * FROM Condition;"),
            "SELECT * FROM condition;"
        );
    }

    #[test]
    fn table_casing_leaves_fields_alone() {
        let sql = "SELECT Patient.name FROM fhir.patient AS Patient;";
        assert_eq!(repair_table_casing(sql), sql);
    }

    #[test]
    fn casing_closure_over_every_variant() {
        for (wrong, correct) in TABLE_NAME_FIXES {
            let quoted = format!("SELECT id FROM `ds.{}` LIMIT 10;", wrong);
            let fixed = repair_table_casing(&quoted);
            assert_eq!(fixed, format!("SELECT id FROM `ds.{}` LIMIT 10;", correct));

            let bare = format!("SELECT id FROM ds.{};", wrong);
            let fixed = repair_table_casing(&bare);
            assert_eq!(fixed, format!("SELECT id FROM ds.{};", correct));
            assert!(!fixed.contains(&format!("ds.{}", wrong)));
        }
    }

    #[test]
    fn renames_known_wrong_fields() {
        assert_eq!(
            repair_field_names("SELECT medicationCodeableConcept.text FROM medication_request;"),
            "SELECT medication.codeableConcept.text FROM medication_request;"
        );
        assert_eq!(
            repair_field_names("SELECT patientId, patientGender FROM patient;"),
            "SELECT id, gender FROM patient;"
        );
    }

    #[test]
    fn field_renames_are_whole_token() {
        let sql = "SELECT mypatientIdx FROM patient;";
        assert_eq!(repair_field_names(sql), sql);
    }

    #[test]
    fn status_alias_is_table_scoped() {
        assert_eq!(
            repair_field_names("SELECT status FROM `ds.condition` WHERE status = 'active';"),
            "SELECT clinicalStatus FROM `ds.condition` WHERE clinicalStatus = 'active';"
        );
        let encounter = "SELECT status FROM ds.encounter;";
        assert_eq!(repair_field_names(encounter), encounter);
    }

    #[test]
    fn strips_nonexistent_nested_ids() {
        assert_eq!(
            repair_nested_ids("SELECT medication.codeableConcept.id AS med FROM medication_request;"),
            "SELECT medication.codeableConcept AS med FROM medication_request;"
        );
        assert_eq!(
            repair_nested_ids("SELECT code.coding[0].id, code.text FROM condition;"),
            "SELECT code.coding[0], code.text FROM condition;"
        );
    }

    #[test]
    fn nested_id_select_collapses_to_record_id() {
        assert_eq!(
            repair_nested_ids("SELECT e.serviceProvider.id, e.status FROM encounter e;"),
            "SELECT id FROM encounter e;"
        );
        assert_eq!(
            repair_nested_ids("SELECT DISTINCT e.serviceProvider.id FROM encounter e;"),
            "SELECT DISTINCT id FROM encounter e;"
        );
    }

    #[test]
    fn record_id_path_collapses_to_top_level_id() {
        assert_eq!(
            extract_and_repair_sql("SELECT code.id FROM condition"),
            "SELECT id FROM condition;"
        );
        assert_eq!(
            repair_nested_ids("SELECT p.id, p.gender FROM patient p;"),
            "SELECT id FROM patient p;"
        );
    }

    #[test]
    fn plain_id_column_is_kept() {
        let sql = "SELECT id, gender FROM patient;";
        assert_eq!(repair_nested_ids(sql), sql);
    }

    #[test]
    fn count_star_becomes_distinct_count() {
        assert_eq!(
            suppress_duplicates("SELECT COUNT(*) FROM condition;"),
            "SELECT COUNT(DISTINCT id) FROM condition;"
        );
    }

    #[test]
    fn enumeration_gets_distinct() {
        assert_eq!(
            suppress_duplicates("SELECT code.text FROM condition LIMIT 1000;"),
            "SELECT DISTINCT code.text FROM condition LIMIT 1000;"
        );
        let plain = "SELECT id, gender FROM patient LIMIT 1000;";
        assert_eq!(suppress_duplicates(plain), plain);
    }

    #[test]
    fn distinct_group_by_and_aggregates_untouched() {
        for sql in [
            "SELECT DISTINCT code.text FROM condition;",
            "SELECT code.text, COUNT(*) FROM condition GROUP BY code.text;",
            "SELECT AVG(value) AS avg_name FROM observation;",
            "SELECT COUNT(DISTINCT subject) FROM condition;",
            "SELECT MAX(birthDate) FROM patient;",
            "SELECT COUNT(*), SUM(x) FROM t;",
            "SELECT COUNT(*) AS n, AVG(age) FROM patient;",
        ] {
            assert_eq!(suppress_duplicates(sql), sql);
        }
    }

    #[test]
    fn select_list_scan_skips_nested_from() {
        let sql = "SELECT EXTRACT(YEAR FROM birthDate) AS y, name FROM patient;";
        let end = select_list_end(sql, "SELECT ".len());
        assert_eq!(&sql[end..end + 4], "FROM");
        assert_eq!(
            split_top_level("a, f(b, c), d[0]", b','),
            vec!["a", " f(b, c)", " d[0]"]
        );
    }

    #[test]
    fn full_pipeline_repairs_typical_response() {
        let raw = "Here is the query:\n```sql\nSELECT EXTRACT(YEAR FROM birthDate) AS birth_year, COUNT(*) AS n\nFROM `bigquery-public-data.fhir_synthea.Patient`\nGROUP BY birth_year\nLIMIT 1000;;\n```";
        assert_eq!(
            extract_and_repair_sql(raw),
            "SELECT EXTRACT(YEAR FROM PARSE_DATE('%Y-%m-%d', birthDate)) AS birth_year, COUNT(*) AS n\nFROM `bigquery-public-data.fhir_synthea.patient`\nGROUP BY birth_year\nLIMIT 1000;"
        );
    }

    #[test]
    fn renamed_date_field_is_still_wrapped() {
        let repaired =
            extract_and_repair_sql("SELECT EXTRACT(YEAR FROM patientBirthDate) AS y FROM patient");
        assert_eq!(
            repaired,
            "SELECT EXTRACT(YEAR FROM PARSE_DATE('%Y-%m-%d', birthDate)) AS y FROM patient;"
        );
    }

    #[test]
    fn pipeline_is_idempotent() {
        let inputs = [
            "SELECT COUNT(*) FROM condition",
            "```sql\nSELECT code.text, status FROM `ds.Condition` LIMIT 10;\n```",
            "SQL: SELECT medicationCodeableConcept.text FROM ds.MedicationRequest;;;",
            "SELECT e.serviceProvider.id FROM ds.encounter e",
            "SELECT EXTRACT(MONTH FROM onsetDateTime) AS m, SUM(x) FROM condition GROUP BY m",
            "SELECT patientBirthDate, EXTRACT(YEAR FROM patientBirthDate) FROM patient",
            "not sql at all",
        ];
        for input in inputs {
            let once = extract_and_repair_sql(input);
            assert_eq!(extract_and_repair_sql(&once), once, "input: {}", input);
        }
    }

    #[test]
    fn output_always_has_exactly_one_terminator() {
        for input in ["SELECT 1", "SELECT 1;", "SELECT 1;;;;", "", ";;", "```\n```"] {
            let out = extract_and_repair_sql(input);
            assert!(out.ends_with(';'));
            assert!(!out.ends_with(";;"), "input {:?} gave {:?}", input, out);
        }
    }

    #[test]
    fn malformed_input_is_returned_trimmed() {
        assert_eq!(
            extract_and_repair_sql("  I cannot answer that.  "),
            "I cannot answer that.;"
        );
    }
}
