// src/aggregate/pagination.rs
// Page bookkeeping for paginate() and chunk()

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationInfo {
    pub limit: u64,
    /// 1-based page number
    pub page: u64,
    /// Number of documents on this page
    pub result: u64,
    pub total: u64,
    pub pages: u64,
}

impl PaginationInfo {
    pub fn new(page: u64, limit: u64, result: u64, total: u64) -> Self {
        PaginationInfo {
            limit,
            page,
            result,
            total,
            pages: page_count(total, limit),
        }
    }
}

/// One page of documents plus its pagination info
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationListing<T> {
    pub documents: Vec<T>,
    pub pagination_info: PaginationInfo,
}

/// `ceil(total / limit)`; a zero limit yields zero pages
pub fn page_count(total: u64, limit: u64) -> u64 {
    if limit == 0 {
        0
    } else {
        total.div_ceil(limit)
    }
}

/// Offset of the first document of a 1-based page
pub fn page_offset(page: u64, limit: u64) -> u64 {
    page.saturating_sub(1).saturating_mul(limit)
}
