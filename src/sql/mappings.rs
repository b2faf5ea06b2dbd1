//! Correction tables used by the repair passes. Extend these rather than the
//! pass logic.

/// Canonical table names with the one-line purpose shown in the prompt.
pub const CANONICAL_TABLES: &[(&str, &str)] = &[
    ("patient", "Patient demographics and basic information"),
    ("observation", "Clinical observations and measurements"),
    ("condition", "Medical conditions and diagnoses"),
    ("procedure", "Medical procedures performed"),
    ("medication_request", "Medications prescribed"),
    ("encounter", "Healthcare encounters/visits"),
    ("organization", "Healthcare organizations"),
    ("practitioner", "Healthcare providers"),
];

/// Wrong casing variants the generator emits, mapped to the canonical name.
pub const TABLE_NAME_FIXES: &[(&str, &str)] = &[
    ("Patient", "patient"),
    ("Observation", "observation"),
    ("Condition", "condition"),
    ("Procedure", "procedure"),
    ("MedicationRequest", "medication_request"),
    ("Encounter", "encounter"),
    ("Organization", "organization"),
    ("Practitioner", "practitioner"),
    ("medicationRequest", "medication_request"),
];

/// Date fields the store keeps as STRING.
pub const STRING_DATE_FIELDS: &[&str] = &[
    "birthDate",
    "assertedDate",
    "effectiveDateTime",
    "issued",
    "start",
    "end",
    "date",
    "onsetDateTime",
    "abatementDateTime",
];

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Whole-token field renames, applied regardless of table.
pub const FIELD_NAME_FIXES: &[(&str, &str)] = &[
    ("medicationCodeableConcept", "medication.codeableConcept"),
    ("conditionStatus", "clinicalStatus"),
    ("conditionCode", "code"),
    ("patientGender", "gender"),
    ("patientBirthDate", "birthDate"),
    ("patientId", "id"),
];

/// A field rename that only applies when the statement reads from `table`.
pub struct TableFieldAlias {
    pub table: &'static str,
    pub token: &'static str,
    pub replacement: &'static str,
}

pub const TABLE_FIELD_ALIASES: &[TableFieldAlias] = &[TableFieldAlias {
    table: "condition",
    token: "status",
    replacement: "clinicalStatus",
}];

/// Nested paths the generator extends with subfields that do not exist.
pub const NESTED_ID_FIXES: &[(&str, &str)] = &[
    ("medication.codeableConcept.id", "medication.codeableConcept"),
    ("code.coding[0].id", "code.coding[0]"),
    ("identifier.id", "identifier"),
    ("coding[0].id", "coding[0]"),
    ("medication.codeableConcept.identifier", "medication.codeableConcept"),
    ("code.coding[0].identifier", "code.coding[0]"),
];

/// Top-level record identifier present on every table.
pub const RECORD_ID_FIELD: &str = "id";

/// Select-list fragments that suggest an enumeration of codes or names.
pub const ENUMERATION_HINTS: &[&str] = &["name", "code", "text", "coding", "display"];

/// Registry date fields plus the wrong spellings that a later pass renames
/// onto one of them.
pub fn date_field_tokens() -> Vec<&'static str> {
    let mut tokens: Vec<&'static str> = STRING_DATE_FIELDS.to_vec();
    tokens.extend(
        FIELD_NAME_FIXES
            .iter()
            .filter(|(_, correct)| STRING_DATE_FIELDS.contains(correct))
            .map(|(wrong, _)| *wrong),
    );
    tokens
}
