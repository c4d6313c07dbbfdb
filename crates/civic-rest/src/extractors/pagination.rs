//! Pagination extractor.

use civic_core::PageRequest;
use serde::Deserialize;

/// Query parameters for pagination. `page` is 1-based.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl From<PaginationQuery> for PageRequest {
    fn from(query: PaginationQuery) -> Self {
        PageRequest::one_based(
            query.page.unwrap_or(1),
            query.limit.unwrap_or(PageRequest::DEFAULT_SIZE),
        )
    }
}
