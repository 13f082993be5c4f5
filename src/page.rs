//! Paging requests and paged results.

use crate::core::{RepoError, Result};
use crate::query::Sort;
use serde::Serialize;

/// Zero-based page index, page size and an optional sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    page: usize,
    size: usize,
    sort: Sort,
}

impl PageRequest {
    pub fn of(page: usize, size: usize) -> Result<Self> {
        Self::of_sorted(page, size, Sort::unsorted())
    }

    pub fn of_sorted(page: usize, size: usize, sort: Sort) -> Result<Self> {
        if size == 0 {
            return Err(RepoError::InvalidPageRequest(
                "page size must be at least 1".into(),
            ));
        }
        if page.checked_mul(size).is_none() {
            return Err(RepoError::InvalidPageRequest(format!(
                "page {} of size {} is out of range",
                page, size
            )));
        }
        Ok(Self { page, size, sort })
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    /// Rows skipped before this page
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }

    /// The following page; `InvalidPageRequest` once its offset would overflow.
    pub fn next(&self) -> Result<Self> {
        let page = self.page.checked_add(1).ok_or_else(|| {
            RepoError::InvalidPageRequest(format!("no page after {}", self.page))
        })?;
        Self::of_sorted(page, self.size, self.sort.clone())
    }

    pub fn previous_or_first(&self) -> Self {
        Self {
            page: self.page.saturating_sub(1),
            ..self.clone()
        }
    }

    pub fn first(&self) -> Self {
        Self {
            page: 0,
            ..self.clone()
        }
    }

    pub(crate) fn clamped(&self, max_size: usize) -> Self {
        Self {
            size: self.size.min(max_size.max(1)),
            ..self.clone()
        }
    }
}

/// One window of a query result together with the total match count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    content: Vec<T>,
    number: usize,
    size: usize,
    total_elements: u64,
}

impl<T> Page<T> {
    /// Content beyond the page size is dropped.
    pub fn new(mut content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        content.truncate(request.size);
        Self {
            content,
            number: request.page,
            size: request.size,
            total_elements,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    /// Zero-based page index
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(self.size as u64)
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    pub fn has_next(&self) -> bool {
        (self.number as u64 + 1) < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    pub fn is_first(&self) -> bool {
        !self.has_previous()
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    /// Convert the content, keeping the paging metadata.
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
        }
    }
}

/// A window that only knows whether another one follows; no count query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slice<T> {
    content: Vec<T>,
    number: usize,
    size: usize,
    has_next: bool,
}

impl<T> Slice<T> {
    /// Build from a fetch of up to `size + 1` rows; the extra row only
    /// signals that a next slice exists.
    pub fn from_overfetch(mut content: Vec<T>, request: &PageRequest) -> Self {
        let has_next = content.len() > request.size;
        content.truncate(request.size);
        Self {
            content,
            number: request.page,
            size: request.size,
            has_next,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Slice<U> {
        Slice {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            has_next: self.has_next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_is_rejected() {
        assert!(matches!(
            PageRequest::of(0, 0),
            Err(RepoError::InvalidPageRequest(_))
        ));
        assert!(PageRequest::of(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_request_navigation() {
        let request = PageRequest::of(2, 10).unwrap();
        assert_eq!(request.offset(), 20);
        assert_eq!(request.next().unwrap().page(), 3);
        assert_eq!(request.previous_or_first().page(), 1);
        assert_eq!(request.first().previous_or_first().page(), 0);
    }

    #[test]
    fn test_next_stops_before_offset_overflow() {
        let last = PageRequest::of(usize::MAX / 4 - 1, 4).unwrap();
        assert_eq!(last.offset(), usize::MAX / 4 * 4 - 4);
        let edge = last.next().unwrap();
        assert!(matches!(edge.next(), Err(RepoError::InvalidPageRequest(_))));
        assert!(matches!(
            PageRequest::of(usize::MAX, 1).unwrap().next(),
            Err(RepoError::InvalidPageRequest(_))
        ));
    }

    #[test]
    fn test_page_metadata() {
        let request = PageRequest::of(0, 3).unwrap();
        let page = Page::new(vec![1, 2, 3], &request, 5);
        assert_eq!(page.total_pages(), 2);
        assert!(page.is_first());
        assert!(page.has_next());
        assert!(!page.is_last());

        let last = Page::new(vec![4, 5], &request.next().unwrap(), 5);
        assert!(last.is_last());
        assert!(last.has_previous());
        assert_eq!(last.number_of_elements(), 2);
    }

    #[test]
    fn test_empty_page() {
        let page: Page<i32> = Page::new(Vec::new(), &PageRequest::of(0, 3).unwrap(), 0);
        assert_eq!(page.total_pages(), 0);
        assert!(page.is_last());
        assert!(!page.has_content());
    }

    #[test]
    fn test_page_map_keeps_metadata() {
        let page = Page::new(vec![1, 2], &PageRequest::of(1, 2).unwrap(), 7);
        let mapped = page.map(|n| n.to_string());
        assert_eq!(mapped.content(), &["1".to_string(), "2".to_string()]);
        assert_eq!(mapped.total_elements(), 7);
        assert_eq!(mapped.number(), 1);
    }

    #[test]
    fn test_slice_from_overfetch() {
        let request = PageRequest::of(0, 3).unwrap();
        let slice = Slice::from_overfetch(vec![1, 2, 3, 4], &request);
        assert_eq!(slice.content(), &[1, 2, 3]);
        assert!(slice.has_next());

        let slice = Slice::from_overfetch(vec![1, 2], &request);
        assert!(!slice.has_next());
        assert!(slice.is_last());
    }
}
