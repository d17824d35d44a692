//! File-backed training dataset of extracted form structures.
//!
//! One [`DatasetRecord`] per line (JSONL). Every mutation rewrites the whole
//! file through a temp file in the same directory and renames it into place,
//! so readers never see a half-written dataset.
//!
//! Each record keeps the rendered page images (base64) next to the structure,
//! so verified records can be exported as complete image/answer fine-tuning
//! pairs with [`DatasetStore::export_verified`].

use crate::error::FormExtractError;
use crate::schema::{FormStructure, PageImage};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// A page image as stored in the dataset file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetImage {
    pub page: usize,
    pub mime_type: String,
    /// Base64 (standard alphabet) of the encoded image bytes.
    pub data: String,
}

impl DatasetImage {
    pub fn from_page(page: &PageImage) -> Self {
        Self {
            page: page.page,
            mime_type: page.mime_type.clone(),
            data: STANDARD.encode(&page.data),
        }
    }

    /// Decode back into the page the model was shown.
    pub fn to_page_image(&self) -> Result<PageImage, FormExtractError> {
        let data = STANDARD.decode(&self.data).map_err(|e| {
            FormExtractError::Internal(format!("dataset image for page {}: {e}", self.page))
        })?;
        Ok(PageImage::new(self.page, data, self.mime_type.clone()))
    }
}

impl std::fmt::Debug for DatasetImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetImage")
            .field("page", &self.page)
            .field("mime_type", &self.mime_type)
            .field("data", &format_args!("<{} base64 chars>", self.data.len()))
            .finish()
    }
}

/// One ingested document, its page images and its (possibly corrected)
/// structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRecord {
    /// Assigned by [`DatasetStore::append`]; 0 until then.
    pub id: u64,
    pub filename: String,
    pub page_count: usize,
    #[serde(default)]
    pub images: Vec<DatasetImage>,
    pub structure: FormStructure,
    /// Set once a human has reviewed or corrected `structure`.
    #[serde(default)]
    pub verified: bool,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl DatasetRecord {
    /// `pages` are the images the structure was extracted from.
    pub fn new(filename: impl Into<String>, pages: &[PageImage], structure: FormStructure) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            id: 0,
            filename: filename.into(),
            page_count: pages.len(),
            images: pages.iter().map(DatasetImage::from_page).collect(),
            structure,
            verified: false,
            created_at,
        }
    }

    pub fn page_images(&self) -> Result<Vec<PageImage>, FormExtractError> {
        self.images.iter().map(DatasetImage::to_page_image).collect()
    }
}

/// Export line shape: the input file name, its page images and its verified
/// structure.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportLine<'a> {
    filename: &'a str,
    images: &'a [DatasetImage],
    form_structure: &'a FormStructure,
}

/// A JSONL dataset loaded into memory.
#[derive(Debug)]
pub struct DatasetStore {
    path: PathBuf,
    records: Vec<DatasetRecord>,
}

impl DatasetStore {
    /// Load the dataset at `path`; a missing file is an empty dataset.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FormExtractError> {
        let path = path.as_ref().to_path_buf();
        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Dataset {} does not exist yet", path.display());
                return Ok(Self {
                    path,
                    records: Vec::new(),
                });
            }
            Err(e) => {
                return Err(FormExtractError::DatasetCorrupt {
                    path,
                    line: 0,
                    detail: e.to_string(),
                })
            }
        };

        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let corrupt = |detail: String| FormExtractError::DatasetCorrupt {
                path: path.clone(),
                line: i + 1,
                detail,
            };
            let line = line.map_err(|e| corrupt(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: DatasetRecord =
                serde_json::from_str(&line).map_err(|e| corrupt(e.to_string()))?;
            records.push(record);
        }
        debug!("Loaded {} dataset records from {}", records.len(), path.display());
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[DatasetRecord] {
        &self.records
    }

    pub fn get(&self, id: u64) -> Option<&DatasetRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Add a record with the next free id and persist. Returns the id.
    pub fn append(&mut self, mut record: DatasetRecord) -> Result<u64, FormExtractError> {
        record.id = self.records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let id = record.id;
        info!(
            "Dataset: adding '{}' as record {} ({} sections)",
            record.filename,
            id,
            record.structure.sections.len()
        );
        self.records.push(record);
        if let Err(e) = self.persist() {
            self.records.pop();
            return Err(e);
        }
        Ok(id)
    }

    /// Replace a record's structure with a reviewed one and mark it verified.
    ///
    /// If the file cannot be rewritten the record is left as it was.
    pub fn mark_verified(
        &mut self,
        id: u64,
        corrected: FormStructure,
    ) -> Result<(), FormExtractError> {
        let index = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or(FormExtractError::DatasetRecordNotFound { id })?;
        let record = &mut self.records[index];
        let previous_structure = std::mem::replace(&mut record.structure, corrected);
        let previous_verified = std::mem::replace(&mut record.verified, true);

        if let Err(e) = self.persist() {
            let record = &mut self.records[index];
            record.structure = previous_structure;
            record.verified = previous_verified;
            return Err(e);
        }
        Ok(())
    }

    /// Write one `{ "filename", "images", "formStructure" }` line per
    /// verified record.
    /// Returns how many lines were written.
    pub fn export_verified<W: Write>(&self, mut writer: W) -> Result<usize, FormExtractError> {
        let mut written = 0;
        for record in self.records.iter().filter(|r| r.verified) {
            let line = ExportLine {
                filename: &record.filename,
                images: &record.images,
                form_structure: &record.structure,
            };
            let json = serde_json::to_string(&line)
                .map_err(|e| FormExtractError::Internal(format!("serialise export: {e}")))?;
            writeln!(writer, "{json}").map_err(|source| self.write_error(source))?;
            written += 1;
        }
        writer.flush().map_err(|source| self.write_error(source))?;
        Ok(written)
    }

    /// Rewrite the file atomically with the current records.
    fn persist(&self) -> Result<(), FormExtractError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|source| self.write_error(source))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(|source| self.write_error(source))?;
        for record in &self.records {
            let json = serde_json::to_string(record)
                .map_err(|e| FormExtractError::Internal(format!("serialise record: {e}")))?;
            writeln!(tmp, "{json}").map_err(|source| self.write_error(source))?;
        }
        tmp.flush().map_err(|source| self.write_error(source))?;
        tmp.persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;
        Ok(())
    }

    fn write_error(&self, source: std::io::Error) -> FormExtractError {
        FormExtractError::OutputWriteFailed {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ComponentKind, Field, Section};

    fn sample_structure() -> FormStructure {
        FormStructure {
            form_title: "Vendor Registration".into(),
            sections: vec![Section {
                id: "section_1".into(),
                title: "Products".into(),
                order: 1,
                fields: vec![
                    Field {
                        id: "field_1_1".into(),
                        component: ComponentKind::Table,
                        label: "Product list".into(),
                        required: false,
                        order: 1,
                        options: None,
                        columns: Some(vec!["Item".into(), "Qty".into()]),
                        row_count: Some(3),
                        placeholder: None,
                    },
                    Field {
                        id: "field_1_2".into(),
                        component: ComponentKind::Dropdown,
                        label: "Currency".into(),
                        required: true,
                        order: 2,
                        options: Some(vec!["USD".into(), "EUR".into()]),
                        columns: None,
                        row_count: None,
                        placeholder: Some("Select".into()),
                    },
                ],
            }],
        }
    }

    fn pages(n: usize) -> Vec<PageImage> {
        (1..=n)
            .map(|p| PageImage::new(p, vec![0x89, b'P', b'N', b'G', p as u8], "image/png"))
            .collect()
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::open(dir.path().join("none.jsonl")).unwrap();
        assert!(store.records().is_empty());
    }

    #[test]
    fn append_persists_and_reloads_losslessly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("forms.jsonl");

        let mut store = DatasetStore::open(&path).unwrap();
        let first = store
            .append(DatasetRecord::new("vendor.pdf", &pages(3), sample_structure()))
            .unwrap();
        let second = store
            .append(DatasetRecord::new("other.pdf", &pages(1), FormStructure::untitled()))
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let reloaded = DatasetStore::open(&path).unwrap();
        assert_eq!(reloaded.records(), store.records());
        assert_eq!(reloaded.get(1).unwrap().structure, sample_structure());

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"pageCount\":3"));
        assert!(text.contains("\"rowCount\":3"));
    }

    #[test]
    fn corrupt_line_reports_its_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.jsonl");
        let mut store = DatasetStore::open(&path).unwrap();
        store
            .append(DatasetRecord::new("a.pdf", &pages(1), FormStructure::untitled()))
            .unwrap();
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("{not json\n");
        std::fs::write(&path, text).unwrap();

        let err = DatasetStore::open(&path).unwrap_err();
        assert!(matches!(err, FormExtractError::DatasetCorrupt { line: 2, .. }));
    }

    #[test]
    fn export_includes_only_verified_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path().join("forms.jsonl")).unwrap();
        let id = store
            .append(DatasetRecord::new("vendor.pdf", &pages(3), FormStructure::untitled()))
            .unwrap();
        store
            .append(DatasetRecord::new("draft.pdf", &pages(2), FormStructure::untitled()))
            .unwrap();
        store.mark_verified(id, sample_structure()).unwrap();

        let mut out = Vec::new();
        assert_eq!(store.export_verified(&mut out).unwrap(), 1);
        let line: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(line["filename"], "vendor.pdf");
        assert_eq!(line["formStructure"]["formTitle"], "Vendor Registration");
        assert_eq!(line["images"].as_array().unwrap().len(), 3);
        assert_eq!(line["images"][0]["mimeType"], "image/png");
        assert_eq!(line["images"][2]["page"], 3);

        let reloaded = DatasetStore::open(store.path()).unwrap();
        assert!(reloaded.get(id).unwrap().verified);
    }

    #[test]
    fn unknown_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path().join("forms.jsonl")).unwrap();
        let err = store.mark_verified(7, FormStructure::untitled()).unwrap_err();
        assert!(matches!(err, FormExtractError::DatasetRecordNotFound { id: 7 }));
    }

    #[test]
    fn page_images_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.jsonl");
        let originals = pages(2);
        let mut store = DatasetStore::open(&path).unwrap();
        let id = store
            .append(DatasetRecord::new("scan.pdf", &originals, sample_structure()))
            .unwrap();

        let reloaded = DatasetStore::open(&path).unwrap();
        let record = reloaded.get(id).unwrap();
        assert_eq!(record.page_count, 2);
        assert_eq!(record.page_images().unwrap(), originals);
    }

    #[test]
    fn records_without_images_still_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.jsonl");
        let line = r#"{"id":4,"filename":"old.pdf","pageCount":1,"structure":{"formTitle":"Old","sections":[]},"createdAt":0}"#;
        std::fs::write(&path, format!("{line}\n")).unwrap();

        let store = DatasetStore::open(&path).unwrap();
        let record = store.get(4).unwrap();
        assert!(record.images.is_empty());
        assert!(!record.verified);
    }

    #[test]
    fn failed_verify_leaves_record_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.jsonl");
        let mut store = DatasetStore::open(&path).unwrap();
        let id = store
            .append(DatasetRecord::new("vendor.pdf", &pages(1), FormStructure::untitled()))
            .unwrap();

        // A directory where the dataset file was makes the rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), b"x").unwrap();

        let err = store.mark_verified(id, sample_structure()).unwrap_err();
        assert!(matches!(err, FormExtractError::OutputWriteFailed { .. }));
        let record = store.get(id).unwrap();
        assert!(!record.verified);
        assert_eq!(record.structure, FormStructure::untitled());

        let mut out = Vec::new();
        assert_eq!(store.export_verified(&mut out).unwrap(), 0);
    }
}
