//! Search requests, result pages and page keys
//!
//! Page keys are opaque to callers: base64 of a two-element JSON array whose
//! first element names the pagination mode.
//!
//! ```text
//! ["native", <backend token>]   resume a native scan
//! ["offset", <n>]               skip n rows of a locally sorted result
//! ```

use crate::error::{StoreError, StoreResult};
use crate::filter::SearchFilter;
use crate::item::Item;
use crate::order::SearchOrder;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;

/// A search call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    /// Filter (defaults to `IncludeAll`)
    pub filter: SearchFilter,
    /// Order (defaults to backend order)
    pub order: SearchOrder,
    /// Resume point from a previous `ResultSet`
    pub page_key: Option<String>,
    /// Page size; backends apply their default when unset
    pub limit: Option<usize>,
}

impl SearchRequest {
    /// Unfiltered, unordered request
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter
    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the order
    pub fn with_order(mut self, order: SearchOrder) -> Self {
        self.order = order;
        self
    }

    /// Resume from a page key
    pub fn with_page_key(mut self, page_key: Option<String>) -> Self {
        self.page_key = page_key;
        self
    }

    /// Set the page size
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Effective page size: `default` when unset, clamped to `1..=max`
    pub fn effective_limit(&self, default: usize, max: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, max.max(1))
    }
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Matching items
    pub results: Vec<Item>,
    /// Key for the next page; `None` when exhausted
    pub next_page_key: Option<String>,
}

impl ResultSet {
    /// A final page
    pub fn last(results: Vec<Item>) -> Self {
        ResultSet {
            results,
            next_page_key: None,
        }
    }
}

/// Decoded page key
#[derive(Debug, Clone, PartialEq)]
pub enum PageKey {
    /// Backend resume token
    Native(serde_json::Value),
    /// Number of rows already returned from a locally sorted result
    Offset(usize),
}

impl PageKey {
    /// Encode as an opaque string
    pub fn encode(&self) -> String {
        let json = match self {
            PageKey::Native(token) => json!(["native", token]),
            PageKey::Offset(offset) => json!(["offset", offset]),
        };
        STANDARD.encode(json.to_string())
    }

    /// Decode an opaque string
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the key is not a page key this crate issued.
    pub fn decode(key: &str) -> StoreResult<PageKey> {
        let invalid = || StoreError::validation(format!("invalid page key: '{}'", key));
        let bytes = STANDARD.decode(key).map_err(|_| invalid())?;
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        match parsed.as_array().map(Vec::as_slice) {
            Some([mode, token]) if mode == "native" => Ok(PageKey::Native(token.clone())),
            Some([mode, offset]) if mode == "offset" => offset
                .as_u64()
                .map(|n| PageKey::Offset(n as usize))
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    /// Decode a key that must be an offset key (`0` when absent)
    pub fn offset_from(key: Option<&str>) -> StoreResult<usize> {
        match key.map(PageKey::decode).transpose()? {
            None => Ok(0),
            Some(PageKey::Offset(n)) => Ok(n),
            Some(PageKey::Native(_)) => Err(StoreError::validation(
                "native page key presented to an offset-paginated search",
            )),
        }
    }

    /// Decode a key that must be a native key
    pub fn native_from(key: Option<&str>) -> StoreResult<Option<serde_json::Value>> {
        match key.map(PageKey::decode).transpose()? {
            None => Ok(None),
            Some(PageKey::Native(token)) => Ok(Some(token)),
            Some(PageKey::Offset(_)) => Err(StoreError::validation(
                "offset page key presented to a natively paginated search",
            )),
        }
    }
}

/// Cut `[offset, offset + limit)` out of a fully materialised result
pub fn slice_page(mut items: Vec<Item>, offset: usize, limit: usize) -> ResultSet {
    let total = items.len();
    if offset >= total {
        return ResultSet::default();
    }
    let end = offset.saturating_add(limit).min(total);
    items.truncate(end);
    let results = items.split_off(offset);
    let next_page_key = (end < total).then(|| PageKey::Offset(end).encode());
    ResultSet {
        results,
        next_page_key,
    }
}
