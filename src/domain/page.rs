//! Paging for summary and statistics queries.

use serde::{Deserialize, Serialize};

/// Ordering of summary slices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortOrder {
    #[default]
    LatestUpdateDesc,
    LatestUpdateAsc,
}

/// Requested page. Pages are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(default)]
    pub page: u32,

    pub size: u32,

    #[serde(default)]
    pub sort: SortOrder,

    /// Also count every match, not only the returned slice
    #[serde(default)]
    pub include_total: bool,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            sort: SortOrder::default(),
            include_total: false,
        }
    }

    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_total(mut self) -> Self {
        self.include_total = true;
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: Option<u64>,
    pub has_next: bool,
}

impl<T> Slice<T> {
    /// Page an already materialised, already ordered list
    pub fn from_vec(items: Vec<T>, request: &PageRequest) -> Self {
        let total = items.len() as u64;
        let offset = request.offset();
        let content: Vec<T> = items
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(request.size as usize)
            .collect();
        let has_next = offset + (content.len() as u64) < total;

        Self {
            content,
            page: request.page,
            size: request.size,
            total_elements: request.include_total.then_some(total),
            has_next,
        }
    }
}
