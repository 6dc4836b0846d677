use serde::{Deserialize, Serialize};

/// Query-string page selector shared by every listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<String>,
}

impl PageParams {
    /// Non-numeric or non-positive input falls back to the first page.
    pub fn requested(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|page| *page > 0)
            .unwrap_or(1)
    }
}

/// Resolved page window. Out-of-range pages clamp to the last page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub number: u32,
    pub per_page: u32,
    pub total: i64,
}

impl PageWindow {
    pub fn resolve(requested: u32, per_page: u32, total: i64) -> Self {
        let per_page = per_page.max(1);
        let pages = num_pages(total, per_page);
        PageWindow {
            number: requested.clamp(1, pages),
            per_page,
            total: total.max(0),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.number - 1) * i64::from(self.per_page)
    }

    pub fn into_page<T>(self, items: Vec<T>) -> Page<T> {
        let total_pages = num_pages(self.total, self.per_page);
        Page {
            items,
            page: self.number,
            per_page: self.per_page,
            total: self.total,
            total_pages,
            has_next: self.number < total_pages,
            has_previous: self.number > 1,
        }
    }
}

fn num_pages(total: i64, per_page: u32) -> u32 {
    if total <= 0 {
        return 1;
    }
    let per_page = i64::from(per_page.max(1));
    let pages = (total + per_page - 1) / per_page;
    u32::try_from(pages).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Page<T> {
    /// Paginate an already materialised result set.
    pub fn from_vec(all: Vec<T>, requested: u32, per_page: u32) -> Self {
        let window = PageWindow::resolve(requested, per_page, all.len() as i64);
        let start = window.offset() as usize;
        let items = all
            .into_iter()
            .skip(start)
            .take(window.per_page as usize)
            .collect();
        window.into_page(items)
    }
}
