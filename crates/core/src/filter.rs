//! Search filter algebra
//!
//! A [`SearchFilter`] is a boolean tree over attribute predicates. Filters
//! arrive from callers unvalidated; [`SearchFilter::lock_attrs`] checks them
//! against the declared attributes, coerces operands and expands free-text
//! `Query` nodes. Locked filters can then be evaluated in memory
//! ([`SearchFilter::matches`]) or pushed down to a backend (see
//! [`crate::native`]).

use crate::attr::{Attr, AttrType, FilterOp};
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::value::Value;
use std::cmp::Ordering;
use std::ops::{BitAnd, BitOr, Not};

/// Right-hand side of an attribute predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `exists` / `not_exists`
    None,
    /// Every comparison and string operator
    Value(Value),
    /// `oneof`
    List(Vec<Value>),
}

/// A single predicate on one attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttrFilter {
    /// Attribute name
    pub name: String,
    /// Operator
    pub op: FilterOp,
    /// Operand
    pub operand: Operand,
    /// Case-insensitive string matching
    pub ignore_case: bool,
}

impl AttrFilter {
    /// The single operand value, if any
    pub fn value(&self) -> Option<&Value> {
        match &self.operand {
            Operand::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The `oneof` operand list (empty for other operators)
    pub fn values(&self) -> &[Value] {
        match &self.operand {
            Operand::List(values) => values,
            _ => &[],
        }
    }

    /// Evaluate against an item
    ///
    /// A type mismatch yields `false`; `ne` and `not_exists` are negations
    /// and so hold for absent fields.
    pub fn matches(&self, item: &Item) -> bool {
        let field = item.get(&self.name).filter(|v| !v.is_null());
        match self.op {
            FilterOp::Exists => field.is_some(),
            FilterOp::NotExists => field.is_none(),
            FilterOp::Eq => self.equals(field),
            FilterOp::Ne => !self.equals(field),
            FilterOp::OneOf => self
                .values()
                .iter()
                .any(|v| field.map_or(false, |f| f.loosely_equals(v))),
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                let (Some(field), Some(operand)) = (field, self.value()) else {
                    return false;
                };
                match field.compare(operand) {
                    Some(ord) => match self.op {
                        FilterOp::Gt => ord == Ordering::Greater,
                        FilterOp::Gte => ord != Ordering::Less,
                        FilterOp::Lt => ord == Ordering::Less,
                        _ => ord != Ordering::Greater,
                    },
                    None => false,
                }
            }
            FilterOp::StartsWith | FilterOp::Contains | FilterOp::EndsWith => {
                let (Some(haystack), Some(needle)) =
                    (field.and_then(Value::as_str), self.value().and_then(Value::as_str))
                else {
                    return false;
                };
                let (haystack, needle) = if self.ignore_case {
                    (haystack.to_lowercase(), needle.to_lowercase())
                } else {
                    (haystack.to_string(), needle.to_string())
                };
                match self.op {
                    FilterOp::StartsWith => haystack.starts_with(&needle),
                    FilterOp::Contains => haystack.contains(&needle),
                    _ => haystack.ends_with(&needle),
                }
            }
        }
    }

    fn equals(&self, field: Option<&Value>) -> bool {
        let operand = self.value().filter(|v| !v.is_null());
        match (field, operand) {
            (None, None) => true,
            (Some(f), Some(o)) if self.ignore_case => match (f.as_str(), o.as_str()) {
                (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
                _ => f.loosely_equals(o),
            },
            (Some(f), Some(o)) => f.loosely_equals(o),
            _ => false,
        }
    }

    fn lock(&self, attrs: &[Attr]) -> StoreResult<AttrFilter> {
        let attr = attrs
            .iter()
            .find(|a| a.name == self.name)
            .ok_or_else(|| StoreError::validation(format!("unknown attribute '{}'", self.name)))?;
        if !attr.readable || !attr.searchable {
            return Err(StoreError::validation(format!(
                "attribute '{}' is not searchable",
                self.name
            )));
        }
        if !attr.permits(self.op) {
            return Err(StoreError::validation(format!(
                "operator '{}' is not permitted on '{}'",
                self.op, self.name
            )));
        }
        if self.ignore_case && attr.attr_type != AttrType::Str {
            return Err(StoreError::validation(format!(
                "case-insensitive match on non-string attribute '{}'",
                self.name
            )));
        }
        let coerce = |value: &Value| -> StoreResult<Value> {
            attr.attr_type.coerce(value.clone()).ok_or_else(|| {
                StoreError::validation(format!(
                    "filter on '{}' expects {}, got {}",
                    self.name,
                    attr.attr_type,
                    value.type_name()
                ))
            })
        };
        let operand = match (self.op, &self.operand) {
            (FilterOp::Exists | FilterOp::NotExists, _) => Operand::None,
            (FilterOp::OneOf, Operand::List(values)) => {
                Operand::List(values.iter().map(coerce).collect::<StoreResult<_>>()?)
            }
            (FilterOp::OneOf, _) => {
                return Err(StoreError::validation("oneof expects a list of values"))
            }
            (_, Operand::Value(value)) => {
                let value = coerce(value)?;
                if value.is_null() && !matches!(self.op, FilterOp::Eq | FilterOp::Ne) {
                    return Err(StoreError::validation(format!(
                        "operator '{}' on '{}' needs a value",
                        self.op, self.name
                    )));
                }
                Operand::Value(value)
            }
            _ => {
                return Err(StoreError::validation(format!(
                    "operator '{}' on '{}' needs a value",
                    self.op, self.name
                )))
            }
        };
        Ok(AttrFilter {
            name: self.name.clone(),
            op: self.op,
            operand,
            ignore_case: self.ignore_case,
        })
    }
}

/// A boolean tree of attribute predicates
#[derive(Debug, Clone, PartialEq)]
pub enum SearchFilter {
    /// Matches every item
    IncludeAll,
    /// Matches no item
    ExcludeAll,
    /// Predicate on one attribute
    Attr(AttrFilter),
    /// Every child matches
    And(Vec<SearchFilter>),
    /// At least one child matches
    Or(Vec<SearchFilter>),
    /// The child does not match
    Not(Box<SearchFilter>),
    /// Free text, expanded by `lock_attrs`
    Query(String),
}

impl Default for SearchFilter {
    fn default() -> Self {
        SearchFilter::IncludeAll
    }
}

macro_rules! value_ctor {
    ($(#[$doc:meta] $fn_name:ident => $op:ident),* $(,)?) => {
        $(
            #[$doc]
            pub fn $fn_name(name: impl Into<String>, value: impl Into<Value>) -> Self {
                SearchFilter::attr(name, FilterOp::$op, Operand::Value(value.into()))
            }
        )*
    };
}

impl SearchFilter {
    fn attr(name: impl Into<String>, op: FilterOp, operand: Operand) -> Self {
        SearchFilter::Attr(AttrFilter {
            name: name.into(),
            op,
            operand,
            ignore_case: false,
        })
    }

    value_ctor! {
        /// `name == value`
        eq => Eq,
        /// `name != value`
        ne => Ne,
        /// `name > value`
        gt => Gt,
        /// `name >= value`
        gte => Gte,
        /// `name < value`
        lt => Lt,
        /// `name <= value`
        lte => Lte,
        /// `name` starts with `value`
        starts_with => StartsWith,
        /// `name` contains `value`
        contains => Contains,
        /// `name` ends with `value`
        ends_with => EndsWith,
    }

    /// `name` is present and not null
    pub fn exists(name: impl Into<String>) -> Self {
        SearchFilter::attr(name, FilterOp::Exists, Operand::None)
    }

    /// `name` is absent or null
    pub fn not_exists(name: impl Into<String>) -> Self {
        SearchFilter::attr(name, FilterOp::NotExists, Operand::None)
    }

    /// `name` equals one of `values`
    pub fn one_of<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        SearchFilter::attr(name, FilterOp::OneOf, Operand::List(values))
    }

    /// Free-text query over string attributes
    pub fn query(text: impl Into<String>) -> Self {
        SearchFilter::Query(text.into())
    }

    /// Conjunction of `filters` (`IncludeAll` when empty)
    pub fn all<I: IntoIterator<Item = SearchFilter>>(filters: I) -> Self {
        filters
            .into_iter()
            .fold(SearchFilter::IncludeAll, |acc, f| acc & f)
    }

    /// Disjunction of `filters` (`ExcludeAll` when empty)
    pub fn any<I: IntoIterator<Item = SearchFilter>>(filters: I) -> Self {
        filters
            .into_iter()
            .fold(SearchFilter::ExcludeAll, |acc, f| acc | f)
    }

    /// Make a string predicate case-insensitive (no-op for other nodes)
    pub fn ignore_case(mut self) -> Self {
        if let SearchFilter::Attr(filter) = &mut self {
            filter.ignore_case = true;
        }
        self
    }

    /// True for `IncludeAll`
    pub fn is_include_all(&self) -> bool {
        matches!(self, SearchFilter::IncludeAll)
    }

    /// Top-level conjuncts: the children of a root `And`, or the root itself
    pub fn conjuncts(&self) -> Vec<&SearchFilter> {
        match self {
            SearchFilter::And(children) => children.iter().collect(),
            SearchFilter::IncludeAll => Vec::new(),
            other => vec![other],
        }
    }

    /// Value of a top-level `eq` conjunct on `name`, if any
    pub fn top_level_eq(&self, name: &str) -> Option<&Value> {
        self.conjuncts().into_iter().find_map(|f| match f {
            SearchFilter::Attr(a) if a.name == name && a.op == FilterOp::Eq && !a.ignore_case => {
                a.value().filter(|v| !v.is_null())
            }
            _ => None,
        })
    }

    /// This filter with the top-level `eq` conjuncts on `names` removed
    pub fn without_top_level_eq(&self, names: &[&str]) -> SearchFilter {
        let mut removed = Vec::new();
        SearchFilter::all(self.conjuncts().into_iter().filter_map(|f| {
            if let SearchFilter::Attr(a) = f {
                let key_eq = a.op == FilterOp::Eq && !a.ignore_case && names.contains(&a.name.as_str());
                if key_eq && a.value().map_or(false, |v| !v.is_null()) && !removed.contains(&a.name) {
                    removed.push(a.name.clone());
                    return None;
                }
            }
            Some(f.clone())
        }))
    }

    /// Validate against `attrs` and return the locked filter
    ///
    /// # Errors
    ///
    /// Returns `Validation` when a referenced attribute is unknown, not
    /// readable or searchable, the operator is not permitted, or an operand
    /// cannot be converted to the attribute type.
    pub fn lock_attrs(&self, attrs: &[Attr]) -> StoreResult<SearchFilter> {
        Ok(match self {
            SearchFilter::IncludeAll => SearchFilter::IncludeAll,
            SearchFilter::ExcludeAll => SearchFilter::ExcludeAll,
            SearchFilter::Attr(filter) => SearchFilter::Attr(filter.lock(attrs)?),
            SearchFilter::And(children) => SearchFilter::all(
                children
                    .iter()
                    .map(|c| c.lock_attrs(attrs))
                    .collect::<StoreResult<Vec<_>>>()?,
            ),
            SearchFilter::Or(children) => SearchFilter::any(
                children
                    .iter()
                    .map(|c| c.lock_attrs(attrs))
                    .collect::<StoreResult<Vec<_>>>()?,
            ),
            SearchFilter::Not(child) => !child.lock_attrs(attrs)?,
            SearchFilter::Query(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(SearchFilter::IncludeAll);
                }
                SearchFilter::any(
                    attrs
                        .iter()
                        .filter(|a| a.attr_type == AttrType::Str && a.permits(FilterOp::Contains))
                        .map(|a| SearchFilter::contains(a.name.clone(), text).ignore_case()),
                )
            }
        })
    }

    /// Evaluate against an item
    ///
    /// An unexpanded `Query` never matches.
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            SearchFilter::IncludeAll => true,
            SearchFilter::ExcludeAll => false,
            SearchFilter::Attr(filter) => filter.matches(item),
            SearchFilter::And(children) => children.iter().all(|c| c.matches(item)),
            SearchFilter::Or(children) => children.iter().any(|c| c.matches(item)),
            SearchFilter::Not(child) => !child.matches(item),
            SearchFilter::Query(_) => false,
        }
    }
}

impl BitAnd for SearchFilter {
    type Output = SearchFilter;

    fn bitand(self, rhs: SearchFilter) -> SearchFilter {
        use SearchFilter::*;
        match (self, rhs) {
            (IncludeAll, f) | (f, IncludeAll) => f,
            (ExcludeAll, _) | (_, ExcludeAll) => ExcludeAll,
            (And(mut a), And(b)) => {
                a.extend(b);
                And(a)
            }
            (And(mut a), f) => {
                a.push(f);
                And(a)
            }
            (f, And(mut b)) => {
                b.insert(0, f);
                And(b)
            }
            (a, b) => And(vec![a, b]),
        }
    }
}

impl BitOr for SearchFilter {
    type Output = SearchFilter;

    fn bitor(self, rhs: SearchFilter) -> SearchFilter {
        use SearchFilter::*;
        match (self, rhs) {
            (ExcludeAll, f) | (f, ExcludeAll) => f,
            (IncludeAll, _) | (_, IncludeAll) => IncludeAll,
            (Or(mut a), Or(b)) => {
                a.extend(b);
                Or(a)
            }
            (Or(mut a), f) => {
                a.push(f);
                Or(a)
            }
            (f, Or(mut b)) => {
                b.insert(0, f);
                Or(b)
            }
            (a, b) => Or(vec![a, b]),
        }
    }
}

impl Not for SearchFilter {
    type Output = SearchFilter;

    fn not(self) -> SearchFilter {
        match self {
            SearchFilter::IncludeAll => SearchFilter::ExcludeAll,
            SearchFilter::ExcludeAll => SearchFilter::IncludeAll,
            SearchFilter::Not(inner) => *inner,
            other => SearchFilter::Not(Box::new(other)),
        }
    }
}
