//! Merge per-batch structures into one document-level [`FormStructure`].
//!
//! Batches are numbered independently, so their ids collide (every batch has
//! a `section_1`). When more than one batch exists, every section is renamed
//! `section_<k>` and every field `field_<k>_<j>`, where `k` runs across the
//! whole document and `j` is the field's position in its section. The `(k, j)`
//! pair is unique per field, so uniqueness needs no registry.
//!
//! The merge is a pure fold with the running section count as its accumulator.

use crate::schema::{FormStructure, RawStructure, Section};

/// Combine batch results, in batch order, into one structure.
///
/// - no results → an empty "Untitled Form"
/// - one result → returned unchanged
/// - many results → title from the first batch, sections concatenated and renumbered
pub fn merge_batches(results: Vec<RawStructure>) -> FormStructure {
    let mut results = results.into_iter();
    let first = match results.next() {
        None => return FormStructure::untitled(),
        Some(first) => first,
    };
    let rest: Vec<RawStructure> = results.collect();
    if rest.is_empty() {
        return first;
    }

    let form_title = first.form_title.clone();
    let (_, sections) = std::iter::once(first)
        .chain(rest)
        .flat_map(|batch| batch.sections)
        .fold((0u32, Vec::new()), |(count, mut acc), section| {
            let k = count + 1;
            acc.push(renumber_section(section, k));
            (k, acc)
        });

    FormStructure {
        form_title,
        sections,
    }
}

/// Give a relocated section its document-level id, order, and field ids.
///
/// Field `order` is kept as computed within the original section.
fn renumber_section(section: Section, k: u32) -> Section {
    let fields = section
        .fields
        .into_iter()
        .enumerate()
        .map(|(j, mut field)| {
            field.id = format!("field_{}_{}", k, j + 1);
            field
        })
        .collect();
    Section {
        id: format!("section_{k}"),
        title: section.title,
        order: k,
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ComponentKind, Field, UNTITLED_FORM};
    use std::collections::HashSet;

    fn field(id: &str, label: &str, order: u32) -> Field {
        Field {
            id: id.into(),
            component: ComponentKind::ShortInput,
            label: label.into(),
            required: false,
            order,
            options: None,
            columns: None,
            row_count: None,
            placeholder: None,
        }
    }

    fn batch(title: &str, sections: &[(&str, Vec<Field>)]) -> RawStructure {
        FormStructure {
            form_title: title.into(),
            sections: sections
                .iter()
                .enumerate()
                .map(|(i, (t, fs))| Section {
                    id: format!("section_{}", i + 1),
                    title: (*t).into(),
                    order: i as u32 + 1,
                    fields: fs.clone(),
                })
                .collect(),
        }
    }

    #[test]
    fn zero_results_give_untitled_form() {
        let merged = merge_batches(vec![]);
        assert_eq!(merged.form_title, UNTITLED_FORM);
        assert!(merged.sections.is_empty());
    }

    #[test]
    fn single_result_is_unchanged() {
        let only = batch("F", &[("A", vec![field("weird-id", "x", 9)])]);
        assert_eq!(merge_batches(vec![only.clone()]), only);
    }

    #[test]
    fn three_batches_renumber_globally() {
        let merged = merge_batches(vec![
            batch("F", &[("A", vec![field("field_1", "f1", 1)])]),
            batch(
                "ignored",
                &[("B", vec![field("field_1", "f2", 1), field("field_2", "f3", 2)])],
            ),
            batch("also ignored", &[("C", vec![field("field_1", "f4", 1)])]),
        ]);

        assert_eq!(merged.form_title, "F");
        let ids: Vec<_> = merged.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["section_1", "section_2", "section_3"]);
        let orders: Vec<_> = merged.sections.iter().map(|s| s.order).collect();
        assert_eq!(orders, [1, 2, 3]);
        let field_ids: Vec<_> = merged.fields().map(|f| f.id.as_str()).collect();
        assert_eq!(field_ids, ["field_1_1", "field_2_1", "field_2_2", "field_3_1"]);
        let labels: Vec<_> = merged.fields().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, ["f1", "f2", "f3", "f4"]);
    }

    #[test]
    fn section_index_is_not_reset_per_batch() {
        let merged = merge_batches(vec![
            batch("F", &[("A", vec![]), ("B", vec![])]),
            batch("G", &[("C", vec![]), ("D", vec![])]),
        ]);
        let titles: Vec<_> = merged.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["A", "B", "C", "D"]);
        assert_eq!(merged.sections[3].id, "section_4");
        assert_eq!(merged.sections[3].order, 4);
    }

    #[test]
    fn field_order_is_preserved_not_renumbered() {
        let merged = merge_batches(vec![
            batch("F", &[("A", vec![field("a", "x", 4), field("b", "y", 7)])]),
            batch("G", &[("B", vec![field("a", "z", 2)])]),
        ]);
        let orders: Vec<_> = merged.fields().map(|f| f.order).collect();
        assert_eq!(orders, [4, 7, 2]);
    }

    #[test]
    fn colliding_ids_become_unique() {
        let batches: Vec<RawStructure> = (0..5)
            .map(|_| {
                batch(
                    "F",
                    &[
                        ("S", vec![field("dup", "a", 1), field("dup", "b", 2)]),
                        ("T", vec![field("dup", "c", 1)]),
                    ],
                )
            })
            .collect();
        let merged = merge_batches(batches);
        let sections: HashSet<_> = merged.sections.iter().map(|s| &s.id).collect();
        assert_eq!(sections.len(), 10);
        let fields: HashSet<_> = merged.fields().map(|f| &f.id).collect();
        assert_eq!(fields.len(), 15);
    }

    #[test]
    fn empty_batches_contribute_nothing() {
        let merged = merge_batches(vec![
            batch("F", &[]),
            batch("G", &[("B", vec![field("x", "x", 1)])]),
        ]);
        assert_eq!(merged.form_title, "F");
        assert_eq!(merged.sections.len(), 1);
        assert_eq!(merged.sections[0].id, "section_1");
    }
}
