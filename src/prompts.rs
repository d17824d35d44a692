//! Prompts for VLM-based form-structure extraction.
//!
//! The system prompt is the contract between the pipeline and the model: the
//! normaliser and merger never infer layout themselves, they assume the model
//! followed these rules (flat section → field hierarchy, stripped serial
//! numbers, titles kept apart from inputs, JSON only). Changing a rule here
//! changes what downstream code receives, so tests pin the key clauses.
//!
//! Callers can override the default via [`crate::config::ExtractionConfig::system_prompt`].

use crate::pipeline::batch::PageBatch;

/// Default system prompt for extracting a form schema from page images.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert form analyst. You receive scanned or rendered pages of a form and must describe its fillable structure as JSON.

Follow these rules precisely:

1. COMPONENT TYPES
   Every field's "component" MUST be exactly one of:
   - "Signature"     — a line or box meant for a signature
   - "Multi-Select"  — a group of checkboxes where several may be ticked
   - "File Upload"   — a request to attach a document, photo, or file
   - "Short Input"   — a single-line blank (name, date, number, email, phone)
   - "Sections"      — a nested group that repeats a block of inputs
   - "Dropdown"      — a choice from a long list of predefined values
   - "Radio Select"  — a group of options where exactly one may be chosen (including Yes/No)
   - "Table"         — a grid with column headers and rows to fill in
   - "Title"         — a heading or sub-heading that is NOT itself an input
   - "Long Input"    — a multi-line box for paragraphs, remarks, or addresses

2. TEXT FIDELITY
   - Copy labels, titles, options, and column headers EXACTLY as printed
   - Preserve the original language, spelling, capitalisation, and punctuation
   - Do NOT translate, paraphrase, summarise, or correct the text
   - Do NOT invent fields that are not visible on the page

3. SERIAL NUMBERS
   - Strip leading serial numbers and list markers from labels and titles
     ("1.", "2)", "(a)", "i.", "A.", "Q3.", "3.1") and keep only the text
   - Example: "4. Date of Birth" becomes "Date of Birth"

4. INSTRUCTION TEXT
   - Exclude instructions, notes, footnotes, and guidance paragraphs
     ("Fill in block letters", "See note 3 overleaf", "For office use only")
   - Exclude page numbers, form codes, and repeated headers/footers

5. TITLES VERSUS FIELDS
   - Printed text followed by a blank line, box, or space to write in is a FIELD;
     the printed text is its label
   - Printed text with nothing to fill in is a "Title" or a section header
   - A label ending in ":" next to an underline is always an input, never a "Title"

6. HIERARCHY
   - Keep the structure FLAT: sections contain fields, fields never contain fields
   - Start a new section at each visible section header or boxed region
   - Fields that precede any header go in a section titled "General"
   - The form's main heading is "formTitle", not a section

7. CHOICES AND TABLES
   - For "Multi-Select", "Radio Select", and "Dropdown" list every printed choice in "options"
   - For "Table" list the header cells in "columns" and the number of blank rows in "rowCount"
   - Mark "required": true only when the form marks the field mandatory (e.g. "*")

8. OUTPUT FORMAT
   Respond with ONLY a JSON object of this shape and nothing else:
   {
     "formTitle": "string",
     "sections": [
       {
         "id": "section_1",
         "title": "string",
         "order": 1,
         "fields": [
           {
             "id": "field_1",
             "component": "Short Input",
             "label": "string",
             "required": false,
             "order": 1,
             "options": ["string"],
             "columns": ["string"],
             "rowCount": 0,
             "placeholder": "string"
           }
         ]
       }
     ]
   }
   - Omit "options", "columns", "rowCount", and "placeholder" when they do not apply
   - Do NOT wrap the JSON in markdown fences
   - Do NOT add commentary or explanations"#;

/// Task instruction sent alongside a batch's images.
///
/// A batch covering the whole job asks for the complete form; a sub-range
/// names its span so the model knows the pages continue a larger form and
/// does not invent a new form title for a later batch. Spans and the total
/// count the supplied images; when those are a subset of the document, the
/// real page numbers are named as well.
pub fn batch_instruction(batch: &PageBatch<'_>, total_pages: usize) -> String {
    let (first, last) = batch.positions();
    let document_pages = if (batch.start_page, batch.end_page()) == (first, last) {
        String::new()
    } else if batch.page_count == 1 {
        format!(" (document page {})", batch.start_page)
    } else if batch.end_page().checked_sub(batch.start_page) == Some(batch.page_count - 1) {
        format!(" (document pages {}-{})", batch.start_page, batch.end_page())
    } else {
        let listed: Vec<String> = batch.images.iter().map(|img| img.page.to_string()).collect();
        format!(" (document pages {})", listed.join(", "))
    };

    if batch.page_count >= total_pages {
        if total_pages == 1 {
            format!("Analyze this form page{document_pages} and extract its complete structure as JSON.")
        } else {
            format!(
                "Analyze these {} form pages{}, in order, and extract the complete form structure as JSON.",
                total_pages, document_pages
            )
        }
    } else {
        format!(
            "These are pages {}-{} of a {}-page form{}, in order. Extract the structure of these \
             pages only as JSON. Number sections and fields from 1 within this response.",
            first, last, total_pages, document_pages
        )
    }
}
