//! Vocabulary normalisation and structural default-filling.
//!
//! This stage absorbs malformed *structure*: any JSON value, however far from
//! the expected shape, comes out as a well-formed [`RawStructure`]. Missing
//! ids, titles, labels, and orders get positional defaults; unknown component
//! names are coerced to a canonical [`ComponentKind`]. Nothing here fails.

use crate::schema::{ComponentKind, Field, FormStructure, RawStructure, Section, UNTITLED_FORM};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Lower-cased synonyms → canonical kind. Canonical names are included in
/// lower case so that "radio select" and "Radio Select" resolve alike.
static SYNONYMS: Lazy<HashMap<&'static str, ComponentKind>> = Lazy::new(|| {
    use ComponentKind::*;
    let table: &[(&str, ComponentKind)] = &[
        ("signature", Signature),
        ("sign", Signature),
        ("signature line", Signature),
        ("signature field", Signature),
        ("e-signature", Signature),
        ("esignature", Signature),
        ("initials", Signature),
        ("multi-select", MultiSelect),
        ("multi select", MultiSelect),
        ("multiselect", MultiSelect),
        ("checkbox", MultiSelect),
        ("checkboxes", MultiSelect),
        ("check box", MultiSelect),
        ("check boxes", MultiSelect),
        ("checklist", MultiSelect),
        ("file upload", FileUpload),
        ("fileupload", FileUpload),
        ("file", FileUpload),
        ("upload", FileUpload),
        ("attachment", FileUpload),
        ("document upload", FileUpload),
        ("image upload", FileUpload),
        ("photo", FileUpload),
        ("short input", ShortInput),
        ("shortinput", ShortInput),
        ("short text", ShortInput),
        ("text", ShortInput),
        ("input", ShortInput),
        ("textbox", ShortInput),
        ("text box", ShortInput),
        ("text field", ShortInput),
        ("textfield", ShortInput),
        ("string", ShortInput),
        ("email", ShortInput),
        ("number", ShortInput),
        ("phone", ShortInput),
        ("date", ShortInput),
        ("sections", Sections),
        ("section", Sections),
        ("group", Sections),
        ("fieldset", Sections),
        ("repeater", Sections),
        ("dropdown", Dropdown),
        ("drop down", Dropdown),
        ("drop-down", Dropdown),
        ("select", Dropdown),
        ("combobox", Dropdown),
        ("combo box", Dropdown),
        ("picklist", Dropdown),
        ("radio select", RadioSelect),
        ("radioselect", RadioSelect),
        ("radio", RadioSelect),
        ("radio button", RadioSelect),
        ("radio buttons", RadioSelect),
        ("radio group", RadioSelect),
        ("single choice", RadioSelect),
        ("yes/no", RadioSelect),
        ("boolean", RadioSelect),
        ("table", Table),
        ("grid", Table),
        ("matrix", Table),
        ("tabular", Table),
        ("title", Title),
        ("instruction", Title),
        ("instructions", Title),
        ("note", Title),
        ("notes", Title),
        ("header", Title),
        ("heading", Title),
        ("subheading", Title),
        ("label", Title),
        ("static text", Title),
        ("long input", LongInput),
        ("longinput", LongInput),
        ("long text", LongInput),
        ("textarea", LongInput),
        ("text area", LongInput),
        ("paragraph", LongInput),
        ("multiline", LongInput),
        ("multi-line", LongInput),
        ("comments", LongInput),
        ("address", LongInput),
    ];
    table.iter().copied().collect()
});

/// Map a free-form component name to a canonical kind.
///
/// Total: empty or unknown input yields [`ComponentKind::ShortInput`].
pub fn normalize_component(raw: Option<&str>) -> ComponentKind {
    let raw = match raw.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return ComponentKind::ShortInput,
    };
    if let Some(kind) = ComponentKind::from_canonical(raw) {
        return kind;
    }
    let lower = raw.to_lowercase();
    if let Some(kind) = SYNONYMS.get(lower.as_str()) {
        return *kind;
    }
    let spaced = lower.replace(['_', '-'], " ");
    if let Some(kind) = SYNONYMS.get(spaced.as_str()) {
        return *kind;
    }
    warn!("Unknown component '{}' coerced to Short Input", raw);
    ComponentKind::ShortInput
}

/// Normalise one field object. `position` is the 1-based index within its section.
pub fn normalize_field(value: &Value, position: usize) -> Field {
    let empty = Map::new();
    let obj = value.as_object().unwrap_or(&empty);

    let component = normalize_component(obj.get("component").and_then(Value::as_str));
    let id = string_of(obj.get("id")).unwrap_or_else(|| format!("field_{position}"));
    let label = string_of(obj.get("label")).unwrap_or_else(|| format!("Field {position}"));
    let required = obj.get("required").map(coerce_bool).unwrap_or(false);
    let order = obj
        .get("order")
        .and_then(positive_int)
        .unwrap_or(position as u32);
    let placeholder = string_of(obj.get("placeholder"));

    let options = component
        .takes_options()
        .then(|| string_list(obj.get("options")));
    let (columns, row_count) = if component.is_tabular() {
        let rows = obj
            .get("rowCount")
            .or_else(|| obj.get("rows"))
            .and_then(non_negative_int)
            .unwrap_or(1);
        (Some(string_list(obj.get("columns"))), Some(rows))
    } else {
        (None, None)
    };

    Field {
        id,
        component,
        label,
        required,
        order,
        options,
        columns,
        row_count,
        placeholder,
    }
}

/// Normalise one section object. `position` is the 1-based index within the structure.
pub fn normalize_section(value: &Value, position: usize) -> Section {
    let empty = Map::new();
    let obj = value.as_object().unwrap_or(&empty);

    let fields = obj
        .get("fields")
        .and_then(Value::as_array)
        .map(|fs| {
            fs.iter()
                .enumerate()
                .map(|(i, f)| normalize_field(f, i + 1))
                .collect()
        })
        .unwrap_or_default();

    Section {
        id: string_of(obj.get("id")).unwrap_or_else(|| format!("section_{position}")),
        title: string_of(obj.get("title")).unwrap_or_else(|| format!("Section {position}")),
        order: obj
            .get("order")
            .and_then(positive_int)
            .unwrap_or(position as u32),
        fields,
    }
}

/// Normalise a whole parsed model answer into a [`RawStructure`].
///
/// A top-level `fields` array with no `sections` is wrapped in a synthetic
/// "General" section. Colliding ids are reassigned so that every section id
/// and every field id is unique within the result, and section `order` is
/// the 1-based array position whatever the model claimed.
pub fn normalize_structure(value: &Value) -> RawStructure {
    let empty = Map::new();
    let obj = value.as_object().unwrap_or(&empty);

    let form_title = string_of(obj.get("formTitle"))
        .or_else(|| string_of(obj.get("title")))
        .unwrap_or_else(|| UNTITLED_FORM.to_string());

    let mut sections: Vec<Section> = match obj.get("sections").and_then(Value::as_array) {
        Some(list) => list
            .iter()
            .enumerate()
            .map(|(i, s)| normalize_section(s, i + 1))
            .collect(),
        None => Vec::new(),
    };

    if sections.is_empty() {
        if let Some(fields) = obj.get("fields").filter(|f| f.is_array()) {
            let mut general = Map::new();
            general.insert("title".into(), Value::from("General"));
            general.insert("fields".into(), fields.clone());
            sections.push(normalize_section(&Value::Object(general), 1));
        }
    }

    dedupe_ids(&mut sections);
    for (k, section) in sections.iter_mut().enumerate() {
        section.order = k as u32 + 1;
    }
    FormStructure {
        form_title,
        sections,
    }
}

/// Reassign duplicate section and field ids in place.
fn dedupe_ids(sections: &mut [Section]) {
    let mut seen_sections = HashSet::new();
    let mut seen_fields = HashSet::new();
    for (k, section) in sections.iter_mut().enumerate() {
        if !seen_sections.insert(section.id.clone()) {
            section.id = unique_id(format!("section_{}", k + 1), &seen_sections);
            seen_sections.insert(section.id.clone());
        }
        for (j, field) in section.fields.iter_mut().enumerate() {
            if !seen_fields.insert(field.id.clone()) {
                field.id = unique_id(format!("field_{}_{}", k + 1, j + 1), &seen_fields);
                seen_fields.insert(field.id.clone());
            }
        }
    }
}

fn unique_id(candidate: String, seen: &HashSet<String>) -> String {
    if !seen.contains(&candidate) {
        return candidate;
    }
    (2..)
        .map(|n| format!("{candidate}_{n}"))
        .find(|c| !seen.contains(c))
        .unwrap_or(candidate)
}

// ── Scalar coercions ─────────────────────────────────────────────────────

/// Non-empty trimmed string; numbers are stringified.
fn string_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| string_of(Some(v))).collect())
        .unwrap_or_default()
}

fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "yes" | "y" | "required" | "1"
        ),
        _ => false,
    }
}

fn non_negative_int(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        })?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u32::try_from(n).ok()
}

fn positive_int(value: &Value) -> Option<u32> {
    non_negative_int(value).filter(|n| *n > 0)
}
