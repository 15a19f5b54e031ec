use serde::{Deserialize, Serialize};

/// Resolved position inside a paginated result set.
///
/// Page numbers start at 1. A missing or zero page resolves to the first
/// page and a page past the end resolves to the last one, so every request
/// lands on a real page even when the underlying rows changed in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub num_pages: i64,
}

impl PageWindow {
    pub fn resolve(requested: Option<i64>, per_page: i64, total: i64) -> Self {
        let per_page = per_page.max(1);
        let total = total.max(0);
        let num_pages = ((total + per_page - 1) / per_page).max(1);
        let page = requested.unwrap_or(1).clamp(1, num_pages);

        Self {
            page,
            per_page,
            total,
            num_pages,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn into_page<T>(self, items: Vec<T>) -> Page<T> {
        Page {
            items,
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            num_pages: self.num_pages,
            has_next: self.page < self.num_pages,
            has_previous: self.page > 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub num_pages: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Page<T> {
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            num_pages: self.num_pages,
            has_next: self.has_next,
            has_previous: self.has_previous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PageWindow;

    #[test]
    fn test_missing_page_is_first_page() {
        let window = PageWindow::resolve(None, 20, 45);
        assert_eq!(window.page, 1);
        assert_eq!(window.num_pages, 3);
        assert_eq!(window.offset(), 0);
    }

    #[test]
    fn test_out_of_range_page_clamps() {
        assert_eq!(PageWindow::resolve(Some(0), 20, 45).page, 1);
        assert_eq!(PageWindow::resolve(Some(-3), 20, 45).page, 1);

        let last = PageWindow::resolve(Some(99), 20, 45);
        assert_eq!(last.page, 3);
        assert_eq!(last.offset(), 40);
    }

    #[test]
    fn test_empty_result_is_single_page() {
        let window = PageWindow::resolve(Some(4), 10, 0);
        assert_eq!(window.page, 1);
        assert_eq!(window.num_pages, 1);

        let page = window.into_page(Vec::<i64>::new());
        assert!(!page.has_next);
        assert!(!page.has_previous);
    }

    #[test]
    fn test_page_flags() {
        let page = PageWindow::resolve(Some(2), 10, 30).into_page(vec![1, 2, 3]);
        assert!(page.has_next);
        assert!(page.has_previous);
        assert_eq!(page.total, 30);
    }
}
