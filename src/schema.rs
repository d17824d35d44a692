//! Form schema types: the canonical output of an extraction.
//!
//! A [`FormStructure`] is a flat two-level hierarchy: ordered [`Section`]s,
//! each holding ordered [`Field`]s. Every type here serialises with the
//! camelCase keys the HTTP boundary and the dataset store expect, and
//! round-trips through JSON without losing the optional `options`,
//! `columns`, `rowCount`, or `placeholder` attributes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Title used when a document (or an empty job) carries no detectable title.
pub const UNTITLED_FORM: &str = "Untitled Form";

/// One whole document's extracted schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormStructure {
    pub form_title: String,
    pub sections: Vec<Section>,
}

/// A batch-scoped structure: normalised, but ids are only unique within
/// the batch. [`crate::pipeline::merge::merge_batches`] turns a sequence of
/// these into a document-level [`FormStructure`].
pub type RawStructure = FormStructure;

impl FormStructure {
    /// An empty structure titled [`UNTITLED_FORM`].
    pub fn untitled() -> Self {
        Self {
            form_title: UNTITLED_FORM.to_string(),
            sections: Vec::new(),
        }
    }

    /// Total number of fields across all sections.
    pub fn field_count(&self) -> usize {
        self.sections.iter().map(|s| s.fields.len()).sum()
    }

    /// Iterate every field in document order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.sections.iter().flat_map(|s| s.fields.iter())
    }
}

/// A visually or structurally grouped region of the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    /// 1-based position in the final document.
    pub order: u32,
    pub fields: Vec<Field>,
}

/// One input element of a form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    pub component: ComponentKind,
    pub label: String,
    pub required: bool,
    /// 1-based position within the originating section's field list.
    pub order: u32,
    /// Choices; present only for Multi-Select, Radio Select, and Dropdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Column headers; present only for Table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    /// Number of input rows; present only for Table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

/// The closed set of field kinds the schema recognises.
///
/// Serialised with the display names the labeling UI uses
/// (`"Multi-Select"`, `"Short Input"`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    #[serde(rename = "Signature")]
    Signature,
    #[serde(rename = "Multi-Select")]
    MultiSelect,
    #[serde(rename = "File Upload")]
    FileUpload,
    #[serde(rename = "Short Input")]
    ShortInput,
    #[serde(rename = "Sections")]
    Sections,
    #[serde(rename = "Dropdown")]
    Dropdown,
    #[serde(rename = "Radio Select")]
    RadioSelect,
    #[serde(rename = "Table")]
    Table,
    #[serde(rename = "Title")]
    Title,
    #[serde(rename = "Long Input")]
    LongInput,
}

impl ComponentKind {
    /// All ten kinds, in the order the extraction prompt lists them.
    pub const ALL: [ComponentKind; 10] = [
        ComponentKind::Signature,
        ComponentKind::MultiSelect,
        ComponentKind::FileUpload,
        ComponentKind::ShortInput,
        ComponentKind::Sections,
        ComponentKind::Dropdown,
        ComponentKind::RadioSelect,
        ComponentKind::Table,
        ComponentKind::Title,
        ComponentKind::LongInput,
    ];

    /// Canonical display name.
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Signature => "Signature",
            ComponentKind::MultiSelect => "Multi-Select",
            ComponentKind::FileUpload => "File Upload",
            ComponentKind::ShortInput => "Short Input",
            ComponentKind::Sections => "Sections",
            ComponentKind::Dropdown => "Dropdown",
            ComponentKind::RadioSelect => "Radio Select",
            ComponentKind::Table => "Table",
            ComponentKind::Title => "Title",
            ComponentKind::LongInput => "Long Input",
        }
    }

    /// Exact (case-sensitive) match against a canonical name.
    pub fn from_canonical(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Whether fields of this kind carry an `options` list.
    pub fn takes_options(self) -> bool {
        matches!(
            self,
            ComponentKind::MultiSelect | ComponentKind::RadioSelect | ComponentKind::Dropdown
        )
    }

    /// Whether fields of this kind carry `columns` and `rowCount`.
    pub fn is_tabular(self) -> bool {
        self == ComponentKind::Table
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rasterised page handed to the pipeline.
///
/// Produced by the image source (see [`crate::pipeline::render`]) or by the
/// caller directly; pages arrive sorted ascending by `page`.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number.
    pub page: usize,
    /// Encoded image bytes (PNG, JPEG, …).
    pub data: Vec<u8>,
    /// Media type of `data`, e.g. `image/png`.
    pub mime_type: String,
}

impl PageImage {
    pub fn new(page: usize, data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            page,
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

// Page bytes can be megabytes; print only their size.
impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page", &self.page)
            .field("data", &format_args!("<{} bytes>", self.data.len()))
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FormStructure {
        FormStructure {
            form_title: "Vendor Registration".into(),
            sections: vec![Section {
                id: "section_1".into(),
                title: "Company".into(),
                order: 1,
                fields: vec![
                    Field {
                        id: "field_1_1".into(),
                        component: ComponentKind::Dropdown,
                        label: "Country".into(),
                        required: true,
                        order: 1,
                        options: Some(vec!["India".into(), "Other".into()]),
                        columns: None,
                        row_count: None,
                        placeholder: Some("Select".into()),
                    },
                    Field {
                        id: "field_1_2".into(),
                        component: ComponentKind::Table,
                        label: "Directors".into(),
                        required: false,
                        order: 2,
                        options: None,
                        columns: Some(vec!["Name".into(), "DIN".into()]),
                        row_count: Some(3),
                        placeholder: None,
                    },
                ],
            }],
        }
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let form = sample();
        let json = serde_json::to_string(&form).unwrap();
        let back: FormStructure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, form);
    }

    #[test]
    fn serialises_camel_case_and_display_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["formTitle"], "Vendor Registration");
        let table = &json["sections"][0]["fields"][1];
        assert_eq!(table["component"], "Table");
        assert_eq!(table["rowCount"], 3);
        assert!(table.get("options").is_none(), "absent options are omitted");
        assert_eq!(json["sections"][0]["fields"][0]["component"], "Dropdown");
    }

    #[test]
    fn canonical_names_match_serde_names() {
        for kind in ComponentKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
            assert_eq!(ComponentKind::from_canonical(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn page_image_debug_hides_bytes() {
        let img = PageImage::new(1, vec![0u8; 2048], "image/png");
        let dbg = format!("{img:?}");
        assert!(dbg.contains("<2048 bytes>"), "got: {dbg}");
    }
}
