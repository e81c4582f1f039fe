//! Native filter push-down
//!
//! Backends translate as much of a locked [`SearchFilter`] as they can into
//! their own query language through a [`NativeFilterBuilder`]. Whatever they
//! cannot express comes back as a residual filter the caller evaluates with
//! [`SearchFilter::matches`].
//!
//! ## Rules
//!
//! - `And`: handled children are conjoined natively; unhandled children are
//!   regrouped into a residual `And`.
//! - `Or` / `Not`: native only if every child is fully handled. Otherwise the
//!   whole node is residual and emits no native constraint, since a partial
//!   disjunction would wrongly exclude rows.
//!
//! The invariant is `native(item) && residual.matches(item) ==
//! filter.matches(item)` for every item.

use crate::filter::{AttrFilter, SearchFilter};

/// Backend-specific translation of filter nodes
///
/// Expressions carry their own bindings (placeholder values), so a node that
/// is built and then discarded leaves nothing behind.
pub trait NativeFilterBuilder {
    /// Native expression type
    type Expr;

    /// Translate one predicate, or `None` if the backend cannot express it
    fn attr_filter(&self, filter: &AttrFilter) -> Option<Self::Expr>;

    /// Conjunction of at least two expressions
    fn and(&self, exprs: Vec<Self::Expr>) -> Self::Expr;

    /// Disjunction of at least two expressions
    fn or(&self, exprs: Vec<Self::Expr>) -> Self::Expr;

    /// Negation
    fn not(&self, expr: Self::Expr) -> Self::Expr;

    /// An always-false expression, if the backend has one
    fn exclude_all(&self) -> Option<Self::Expr> {
        None
    }
}

/// Result of pushing a filter down to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct NativeExpression<E> {
    /// Native constraint; `None` means unconstrained
    pub expr: Option<E>,
    /// Part the backend could not express
    pub residual: SearchFilter,
    /// True when `residual` is `IncludeAll`
    pub fully_handled: bool,
}

/// Split `filter` into a native expression and a residual filter
pub fn build_native_expression<B: NativeFilterBuilder>(
    filter: &SearchFilter,
    builder: &B,
) -> NativeExpression<B::Expr> {
    let (expr, residual) = split(filter, builder);
    let fully_handled = residual.is_include_all();
    NativeExpression {
        expr,
        residual,
        fully_handled,
    }
}

fn split<B: NativeFilterBuilder>(
    filter: &SearchFilter,
    builder: &B,
) -> (Option<B::Expr>, SearchFilter) {
    match filter {
        SearchFilter::IncludeAll => (None, SearchFilter::IncludeAll),
        SearchFilter::ExcludeAll => match builder.exclude_all() {
            Some(expr) => (Some(expr), SearchFilter::IncludeAll),
            None => (None, SearchFilter::ExcludeAll),
        },
        SearchFilter::Attr(attr) => match builder.attr_filter(attr) {
            Some(expr) => (Some(expr), SearchFilter::IncludeAll),
            None => (None, filter.clone()),
        },
        SearchFilter::And(children) => {
            let mut exprs = Vec::new();
            let mut residuals = Vec::new();
            for child in children {
                let (expr, residual) = split(child, builder);
                exprs.extend(expr);
                residuals.push(residual);
            }
            (combine(exprs, builder, B::and), SearchFilter::all(residuals))
        }
        SearchFilter::Or(children) => {
            let mut exprs = Vec::new();
            for child in children {
                match split(child, builder) {
                    (Some(expr), residual) if residual.is_include_all() => exprs.push(expr),
                    // An unconstrained, fully handled child makes the whole Or true
                    (None, residual) if residual.is_include_all() => {
                        return (None, SearchFilter::IncludeAll)
                    }
                    _ => return (None, filter.clone()),
                }
            }
            (combine(exprs, builder, B::or), SearchFilter::IncludeAll)
        }
        SearchFilter::Not(child) => match split(child, builder) {
            (Some(expr), residual) if residual.is_include_all() => {
                (Some(builder.not(expr)), SearchFilter::IncludeAll)
            }
            (None, residual) if residual.is_include_all() => split(&SearchFilter::ExcludeAll, builder),
            _ => (None, filter.clone()),
        },
        SearchFilter::Query(_) => (None, filter.clone()),
    }
}

fn combine<B: NativeFilterBuilder>(
    mut exprs: Vec<B::Expr>,
    builder: &B,
    join: fn(&B, Vec<B::Expr>) -> B::Expr,
) -> Option<B::Expr> {
    match exprs.len() {
        0 => None,
        1 => exprs.pop(),
        _ => Some(join(builder, exprs)),
    }
}
