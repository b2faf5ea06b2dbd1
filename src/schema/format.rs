//! Renders table schemas as the field listing embedded in generation prompts.

use crate::schema::{Field, TableSchema};
use std::fmt::Write;

const NO_DESCRIPTION: &str = "No description";

/// Renders one table as `name (TYPE, MODE): description` lines.
///
/// RECORD fields get a warning that they carry no implicit `id` subfield and
/// list the dot paths of the subfields that actually exist.
pub fn format_table(schema: &TableSchema) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}:", schema.table_name);
    for field in &schema.fields {
        format_field(&mut out, field);
    }
    out
}

fn format_field(out: &mut String, field: &Field) {
    let description = field
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(NO_DESCRIPTION);
    let _ = writeln!(
        out,
        "  - {} ({}, {}): {}",
        field.name, field.field_type, field.mode, description
    );

    if field.field_type.is_record() {
        let _ = writeln!(
            out,
            "    NOTE: nested RECORD field - do NOT assume it has an 'id' subfield"
        );
        let _ = writeln!(
            out,
            "    NOTE: use dot notation and only the subfields listed here: {}.<subfield>",
            field.name
        );
        if !field.nested_fields.is_empty() {
            let _ = writeln!(out, "    Available nested fields:");
            for nested in &field.nested_fields {
                format_nested(out, &field.name, nested);
            }
        }
    }
}

fn format_nested(out: &mut String, parent: &str, field: &Field) {
    let path = format!("{}.{}", parent, field.name);
    let _ = writeln!(out, "      - {} ({}, {})", path, field.field_type, field.mode);
    for nested in &field.nested_fields {
        format_nested(out, &path, nested);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldMode, FieldType};

    #[test]
    fn scalar_fields_render_one_line_each() {
        let table = TableSchema::new(
            "patient",
            vec![
                Field::scalar("id", FieldType::String, FieldMode::Required)
                    .with_description("Logical id"),
                Field::scalar("birthDate", FieldType::String, FieldMode::Nullable),
            ],
        );
        assert_eq!(
            format_table(&table),
            "patient:\n  - id (STRING, REQUIRED): Logical id\n  - birthDate (STRING, NULLABLE): No description\n"
        );
    }

    #[test]
    fn record_fields_carry_warning_and_paths() {
        let coding = Field::record(
            "coding",
            FieldMode::Repeated,
            vec![Field::scalar("display", FieldType::String, FieldMode::Nullable)],
        );
        let code = Field::record(
            "code",
            FieldMode::Nullable,
            vec![Field::scalar("text", FieldType::String, FieldMode::Nullable), coding],
        );
        let rendered = format_table(&TableSchema::new("condition", vec![code]));

        assert!(rendered.contains("  - code (RECORD, NULLABLE): No description\n"));
        assert!(rendered.contains("do NOT assume it has an 'id' subfield"));
        assert!(rendered.contains("      - code.text (STRING, NULLABLE)\n"));
        assert!(rendered.contains("      - code.coding (RECORD, REPEATED)\n"));
        assert!(rendered.contains("      - code.coding.display (STRING, NULLABLE)\n"));
    }
}
