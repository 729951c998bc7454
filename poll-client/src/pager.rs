use serde::{Deserialize, Serialize};

use crate::model::PollView;

/// Which half of the active polls is on screen.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ViewFilter {
    #[default]
    NotVoted,
    Voted,
}

impl ViewFilter {
    /// Expired polls belong to neither half; they are only reachable through
    /// the closed poll results.
    pub fn matches(&self, view: &PollView) -> bool {
        if !view.is_active {
            return false;
        }
        match self {
            ViewFilter::NotVoted => !view.record.has_voted,
            ViewFilter::Voted => view.record.has_voted,
        }
    }

    pub fn toggled(&self) -> ViewFilter {
        match self {
            ViewFilter::NotVoted => ViewFilter::Voted,
            ViewFilter::Voted => ViewFilter::NotVoted,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub filter: ViewFilter,
    pub items: Vec<PollView>,
    /// 1-based, and 1 when there is nothing to show.
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// One page of any list, with the same numbering as [`Page`].
#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// Page position over a list of known length. The page is kept within
/// `1..=total_pages` on every move and re-clamped on every view.
#[derive(Debug, Clone)]
pub struct Pager {
    page: usize,
    page_size: usize,
}

impl Pager {
    pub fn new(page_size: usize) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total_pages(&self, total_items: usize) -> usize {
        total_items.div_ceil(self.page_size)
    }

    pub fn reset(&mut self) {
        self.page = 1;
    }

    pub fn next_page(&mut self, total_items: usize) -> usize {
        self.set_page(self.page.saturating_add(1), total_items)
    }

    pub fn prev_page(&mut self, total_items: usize) -> usize {
        self.set_page(self.page.saturating_sub(1), total_items)
    }

    pub fn set_page(&mut self, page: usize, total_items: usize) -> usize {
        self.page = page.clamp(1, self.total_pages(total_items).max(1));
        self.page
    }

    pub fn view<T: Clone>(&mut self, items: &[T]) -> Paged<T> {
        let total_items = items.len();
        let total_pages = self.total_pages(total_items);
        self.set_page(self.page, total_items);

        Paged {
            items: items
                .iter()
                .skip((self.page - 1) * self.page_size)
                .take(self.page_size)
                .cloned()
                .collect(),
            page: self.page,
            total_pages,
            total_items,
        }
    }
}

/// Filter toggle plus the current page. Works on derived views only and never
/// touches the poll collection.
#[derive(Debug, Clone)]
pub struct ViewFilterPager {
    filter: ViewFilter,
    pager: Pager,
}

impl ViewFilterPager {
    pub fn new(page_size: usize, filter: ViewFilter) -> Self {
        Self {
            filter,
            pager: Pager::new(page_size),
        }
    }

    pub fn filter(&self) -> ViewFilter {
        self.filter
    }

    pub fn page(&self) -> usize {
        self.pager.page()
    }

    pub fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    /// Switching halves starts over at the first page.
    pub fn set_filter(&mut self, filter: ViewFilter) {
        if self.filter != filter {
            self.filter = filter;
            self.pager.reset();
        }
    }

    pub fn total_pages(&self, views: &[PollView]) -> usize {
        self.pager.total_pages(self.count(views))
    }

    pub fn next_page(&mut self, views: &[PollView]) -> usize {
        let count = self.count(views);
        self.pager.next_page(count)
    }

    pub fn prev_page(&mut self, views: &[PollView]) -> usize {
        let count = self.count(views);
        self.pager.prev_page(count)
    }

    pub fn set_page(&mut self, page: usize, views: &[PollView]) -> usize {
        let count = self.count(views);
        self.pager.set_page(page, count)
    }

    /// The current page of the filtered views, re-clamping first in case the
    /// partition shrank since the last call.
    pub fn view(&mut self, views: &[PollView]) -> Page {
        let filtered: Vec<PollView> = views.iter().filter(|view| self.filter.matches(view)).cloned().collect();
        let paged = self.pager.view(&filtered);

        Page {
            filter: self.filter,
            items: paged.items,
            page: paged.page,
            total_pages: paged.total_pages,
            total_items: paged.total_items,
        }
    }

    fn count(&self, views: &[PollView]) -> usize {
        views.iter().filter(|view| self.filter.matches(view)).count()
    }
}
