//! Pagination state for slicing an already fetched collection.

use std::ops::Range;

/// Starting point for a [`Paginator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationConfig {
  pub initial_page: usize,
  pub page_size: usize,
  pub total_items: usize,
}

impl Default for PaginationConfig {
  fn default() -> Self {
    Self {
      initial_page: 1,
      page_size: 10,
      total_items: 0,
    }
  }
}

/// Derived navigation state. Pages are 1-based, indices 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationState {
  pub page: usize,
  pub page_size: usize,
  pub total_items: usize,
  pub total_pages: usize,
  pub has_next_page: bool,
  pub has_previous_page: bool,
  pub start_index: usize,
  /// Index of the last item on the page, `None` when there are no items.
  pub end_index: Option<usize>,
}

/// Page / page-size / total bookkeeping.
///
/// The page always stays within `1..=total_pages`, and `total_pages` is at
/// least 1 even for an empty collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paginator {
  page: usize,
  page_size: usize,
  total_items: usize,
}

impl Default for Paginator {
  fn default() -> Self {
    Self::new(PaginationConfig::default())
  }
}

impl Paginator {
  pub fn new(config: PaginationConfig) -> Self {
    let mut paginator = Self {
      page: 1,
      page_size: config.page_size.max(1),
      total_items: config.total_items,
    };
    paginator.set_page(config.initial_page);
    paginator
  }

  pub fn page(&self) -> usize {
    self.page
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  pub fn total_items(&self) -> usize {
    self.total_items
  }

  pub fn total_pages(&self) -> usize {
    self.total_items.div_ceil(self.page_size).max(1)
  }

  pub fn has_next_page(&self) -> bool {
    self.page < self.total_pages()
  }

  pub fn has_previous_page(&self) -> bool {
    self.page > 1
  }

  pub fn start_index(&self) -> usize {
    (self.page - 1) * self.page_size
  }

  pub fn end_index(&self) -> Option<usize> {
    let last = self.total_items.checked_sub(1)?;
    Some((self.start_index() + self.page_size - 1).min(last))
  }

  /// Item range of the current page, clipped to the collection.
  pub fn range(&self) -> Range<usize> {
    let start = self.start_index().min(self.total_items);
    let end = (self.start_index() + self.page_size).min(self.total_items);
    start..end
  }

  /// The current page of `items`.
  pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
    let range = self.range();
    let end = range.end.min(items.len());
    &items[range.start.min(end)..end]
  }

  pub fn state(&self) -> PaginationState {
    PaginationState {
      page: self.page,
      page_size: self.page_size,
      total_items: self.total_items,
      total_pages: self.total_pages(),
      has_next_page: self.has_next_page(),
      has_previous_page: self.has_previous_page(),
      start_index: self.start_index(),
      end_index: self.end_index(),
    }
  }

  /// Jump to `page`, clamped into `1..=total_pages`.
  pub fn set_page(&mut self, page: usize) {
    self.page = page.clamp(1, self.total_pages());
  }

  /// Change the page size and go back to the first page.
  pub fn set_page_size(&mut self, page_size: usize) {
    self.page_size = page_size.max(1);
    self.page = 1;
  }

  /// Change the item count, re-clamping the current page.
  pub fn set_total_items(&mut self, total_items: usize) {
    self.total_items = total_items;
    self.set_page(self.page);
  }

  pub fn next_page(&mut self) {
    if self.has_next_page() {
      self.page += 1;
    }
  }

  pub fn previous_page(&mut self) {
    if self.has_previous_page() {
      self.page -= 1;
    }
  }

  pub fn first_page(&mut self) {
    self.page = 1;
  }

  pub fn last_page(&mut self) {
    self.page = self.total_pages();
  }
}
