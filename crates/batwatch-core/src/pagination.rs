//! Page slicing for the recording and prediction tables.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
}

/// Returns page `page` (1-based; 0 is read as 1) of `items`. `per_page` is clamped to
/// `1..=max_per_page`. Pages past the end are empty but keep the totals.
pub fn paginate<T>(items: Vec<T>, page: usize, per_page: usize, max_per_page: usize) -> Page<T> {
    let per_page = per_page.clamp(1, max_per_page.max(1));
    let page = page.max(1);
    let total = items.len();
    let total_pages = total.div_ceil(per_page);
    let start = (page - 1).saturating_mul(per_page);
    let items = items.into_iter().skip(start).take(per_page).collect();
    Page {
        items,
        page,
        per_page,
        total,
        total_pages,
    }
}
