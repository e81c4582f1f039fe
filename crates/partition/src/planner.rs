//! Partition/sort-key query planner
//!
//! Turns a locked filter and an order into a [`QueryPlan`]:
//!
//! 1. **Index scoring.** Every access path (the table key, then each
//!    secondary index in declaration order) scores 0 when its partition key
//!    is not a top-level equality of the filter, 20 when it is and the single
//!    order attribute is the path's sort key, and 10 otherwise. The highest
//!    score wins; ties keep the earlier path. All zero means a scan.
//! 2. **Filter split.** The partition key equality (and the sort key
//!    equality, if present) become the key condition. The rest is pushed
//!    down through [`PartitionFilterBuilder`]; what cannot be expressed stays
//!    in the residual filter.
//! 3. **Ordering.** An empty order, or one that is exactly the chosen sort
//!    key, is served natively. Anything else is sorted locally.
//!
//! Secondary indexes are sparse, so an index with a sort key is only a
//! candidate when every stored item is guaranteed to carry that sort key
//! (it is a key field or a non-nullable attribute).

use storekit_core::{
    build_native_expression, SearchFilter, SearchOrder, StoreError, StoreMeta, StoreResult,
};
use tracing::debug;

use crate::client::{
    KeyCondition, KeySchema, Page, PartitionClient, QueryRequest, ScanRequest, TableSpec,
};
use crate::condition::{Condition, PartitionFilterBuilder};
use crate::error::PartitionResult;
use crate::native::{to_native, to_native_exact, NativeItem, NativeValue};

/// Score of a path whose partition key is not constrained
pub const SCORE_NONE: u8 = 0;
/// Score of a path whose partition key is a top-level equality
pub const SCORE_PARTITION: u8 = 10;
/// Score of a constrained path whose sort key is also the requested order
pub const SCORE_ORDERED: u8 = 20;

/// How results are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMode {
    /// Native order; pages resume from a native key
    Native {
        /// Ascending when true
        scan_forward: bool,
    },
    /// Buffer every match, sort locally, page by offset
    LocalSort,
}

/// How to fetch native pages
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    /// Query the table (`index: None`) or a secondary index
    Query {
        /// Secondary index name
        index: Option<String>,
        /// Key condition
        key: KeyCondition,
    },
    /// Scan the whole table
    Scan,
}

/// The plan for one search or count
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Table name
    pub table: String,
    /// Chosen access path
    pub access: Access,
    /// Score of the chosen path
    pub score: u8,
    /// Native filter expression
    pub filter: Option<Condition>,
    /// Part of the filter evaluated after fetching
    pub residual: SearchFilter,
    /// Ordering mode
    pub mode: OrderMode,
    /// Attributes a native resume key carries
    pub resume_names: Vec<String>,
}

impl QueryPlan {
    /// True when the native filter covers the whole search filter
    pub fn fully_handled(&self) -> bool {
        self.residual.is_include_all()
    }

    /// Fetch one native page
    pub fn fetch(
        &self,
        client: &dyn PartitionClient,
        exclusive_start_key: Option<NativeItem>,
        limit: Option<usize>,
    ) -> PartitionResult<Page> {
        match &self.access {
            Access::Query { index, key } => client.query(&QueryRequest {
                table: self.table.clone(),
                index: index.clone(),
                key: key.clone(),
                filter: self.filter.clone(),
                scan_forward: match self.mode {
                    OrderMode::Native { scan_forward } => scan_forward,
                    OrderMode::LocalSort => true,
                },
                limit,
                exclusive_start_key,
            }),
            Access::Scan => client.scan(&ScanRequest {
                table: self.table.clone(),
                filter: self.filter.clone(),
                limit,
                exclusive_start_key,
            }),
        }
    }

    /// The resume key for `item`
    pub fn resume_key(&self, item: &NativeItem) -> NativeItem {
        self.resume_names
            .iter()
            .filter_map(|name| item.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }
}

/// Plans searches for one table
pub struct Planner<'a> {
    meta: &'a StoreMeta,
    spec: &'a TableSpec,
}

impl<'a> Planner<'a> {
    /// Planner over `spec`, the table layout of `meta`
    pub fn new(meta: &'a StoreMeta, spec: &'a TableSpec) -> Self {
        Planner { meta, spec }
    }

    /// Score one access path
    pub fn score(filter: &SearchFilter, order: &SearchOrder, key: &KeySchema) -> u8 {
        if filter.top_level_eq(&key.pk).is_none() {
            return SCORE_NONE;
        }
        match (order.single(), &key.sk) {
            (Some(field), Some(sk)) if &field.attr == sk => SCORE_ORDERED,
            _ => SCORE_PARTITION,
        }
    }

    /// True if every stored item appears under `key`
    fn covers_every_item(&self, key: &KeySchema) -> bool {
        key.sk.as_deref().map_or(true, |sk| {
            self.meta.key_config.is_required_attr(sk)
                || self.meta.attr(sk).map_or(false, |a| !a.nullable)
        })
    }

    /// Candidate paths in tie-break order: the table, then secondary indexes
    fn paths(&self) -> Vec<(Option<&'a str>, &'a KeySchema)> {
        std::iter::once((None, &self.spec.key))
            .chain(
                self.spec
                    .indexes
                    .iter()
                    .filter(|index| self.covers_every_item(&index.key))
                    .map(|index| (Some(index.name.as_str()), &index.key)),
            )
            .collect()
    }

    /// Plan a locked `filter` with `order`
    ///
    /// # Errors
    ///
    /// Returns `Validation` if a key equality value cannot be stored natively.
    pub fn plan(&self, filter: &SearchFilter, order: &SearchOrder) -> StoreResult<QueryPlan> {
        let mut best: Option<(Option<&str>, &KeySchema, u8)> = None;
        for (index, key) in self.paths() {
            let score = Self::score(filter, order, key);
            if score > best.map_or(SCORE_NONE, |(_, _, s)| s) {
                best = Some((index, key, score));
            }
        }

        let builder = PartitionFilterBuilder::new(self.meta, &self.spec.key.pk);
        let plan = match best {
            Some((index, key, score)) => {
                let pk = self.key_value(filter, &key.pk)?;
                let sk = match &key.sk {
                    Some(name) if filter.top_level_eq(name).is_some() => {
                        Some(self.key_value(filter, name)?)
                    }
                    _ => None,
                };
                // A rounded key value selects a superset, so its equality stays
                let mut used = Vec::new();
                if self.exact_key(filter, &key.pk) {
                    used.push(key.pk.as_str());
                }
                if let Some(name) = key.sk.as_deref().filter(|_| sk.is_some()) {
                    if self.exact_key(filter, name) {
                        used.push(name);
                    }
                }
                let native = build_native_expression(&filter.without_top_level_eq(&used), &builder);
                let mode = match order.single() {
                    _ if order.is_empty() => OrderMode::Native { scan_forward: true },
                    Some(field) if Some(&field.attr) == key.sk.as_ref() => OrderMode::Native {
                        scan_forward: !field.desc,
                    },
                    _ => OrderMode::LocalSort,
                };
                QueryPlan {
                    table: self.spec.name.clone(),
                    access: Access::Query {
                        index: index.map(String::from),
                        key: KeyCondition { pk, sk },
                    },
                    score,
                    filter: native.expr,
                    residual: native.residual,
                    mode,
                    resume_names: self
                        .spec
                        .resume_names(key)
                        .into_iter()
                        .map(String::from)
                        .collect(),
                }
            }
            None => {
                let native = build_native_expression(filter, &builder);
                QueryPlan {
                    table: self.spec.name.clone(),
                    access: Access::Scan,
                    score: SCORE_NONE,
                    filter: native.expr,
                    residual: native.residual,
                    mode: if order.is_empty() {
                        OrderMode::Native { scan_forward: true }
                    } else {
                        OrderMode::LocalSort
                    },
                    resume_names: self.spec.key.names().into_iter().map(String::from).collect(),
                }
            }
        };
        let rendered = plan
            .filter
            .as_ref()
            .map(|c| c.render().expression)
            .unwrap_or_default();
        debug!(
            target: "storekit::partition",
            table = %plan.table,
            access = ?plan.access,
            score = plan.score,
            mode = ?plan.mode,
            filter = %rendered,
            fully_handled = plan.fully_handled(),
            "planned search"
        );
        Ok(plan)
    }

    /// True if the equality on key attribute `name` survives native conversion
    fn exact_key(&self, filter: &SearchFilter, name: &str) -> bool {
        match (filter.top_level_eq(name), self.meta.attr(name)) {
            (Some(value), Some(attr)) => to_native_exact(attr.attr_type, value).is_some(),
            _ => false,
        }
    }

    fn key_value(&self, filter: &SearchFilter, name: &str) -> StoreResult<NativeValue> {
        let value = filter
            .top_level_eq(name)
            .ok_or_else(|| StoreError::validation(format!("no equality on key '{}'", name)))?;
        let attr = self
            .meta
            .attr(name)
            .ok_or_else(|| StoreError::validation(format!("unknown attribute '{}'", name)))?;
        to_native(attr.attr_type, value)
    }
}
