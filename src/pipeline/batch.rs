//! Batch planning: split an ordered page sequence into model-sized groups.

use crate::schema::PageImage;

/// A contiguous group of pages sent together in one model call.
#[derive(Debug, Clone, Copy)]
pub struct PageBatch<'a> {
    /// 0-based position of this batch within the job.
    pub index: usize,
    /// 0-based position of the first image within the supplied sequence.
    /// Differs from `start_page - 1` when only a page subset was rendered.
    pub offset: usize,
    /// Page number of the first image in the batch.
    pub start_page: usize,
    pub page_count: usize,
    pub images: &'a [PageImage],
}

impl PageBatch<'_> {
    /// Page number of the last image in the batch.
    pub fn end_page(&self) -> usize {
        self.images
            .last()
            .map(|img| img.page)
            .unwrap_or(self.start_page)
    }

    /// 1-based positions of the first and last image within the job.
    pub fn positions(&self) -> (usize, usize) {
        (self.offset + 1, self.offset + self.page_count)
    }
}

/// Partition `images` into contiguous, non-overlapping windows of at most
/// `max_per_batch` pages, preserving order. The last window may be shorter.
///
/// Empty input yields no batches. A `max_per_batch` of 0 is treated as 1.
pub fn plan_batches(images: &[PageImage], max_per_batch: usize) -> Vec<PageBatch<'_>> {
    let size = max_per_batch.max(1);
    images
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| PageBatch {
            index,
            offset: index * size,
            start_page: chunk[0].page,
            page_count: chunk.len(),
            images: chunk,
        })
        .collect()
}
