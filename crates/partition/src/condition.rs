//! Condition expressions
//!
//! [`Condition`] is the partition store's native filter and precondition
//! language. It is evaluated against stored items by [`crate::LocalClient`]
//! and rendered into expression text with name/value placeholders for
//! logging and for remote clients.
//!
//! [`PartitionFilterBuilder`] translates locked search filters into
//! conditions. Not everything translates: case-insensitive matching,
//! `endswith`, and anything but `exists`/`not_exists` on JSON attributes stay
//! in the residual filter.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use storekit_core::{AttrFilter, AttrType, FilterOp, NativeFilterBuilder, StoreMeta, Value};

use crate::native::{to_native_exact, NativeItem, NativeValue};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// A native condition over one stored item
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `path op value`
    Cmp {
        /// Attribute name
        path: String,
        /// Operator
        op: CmpOp,
        /// Operand
        value: NativeValue,
    },
    /// `attribute_exists(path)`
    Exists(String),
    /// `attribute_not_exists(path)`
    NotExists(String),
    /// `begins_with(path, prefix)`
    BeginsWith(String, String),
    /// `contains(path, needle)`
    Contains(String, String),
    /// `path IN (values)`; never empty
    In(String, Vec<NativeValue>),
    /// Every child holds
    And(Vec<Condition>),
    /// Some child holds
    Or(Vec<Condition>),
    /// The child does not hold
    Not(Box<Condition>),
}

/// Expression text with its placeholder bindings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedCondition {
    /// Expression, e.g. `(#n0 = :v0 AND attribute_exists(#n1))`
    pub expression: String,
    /// `#nX` → attribute name
    pub names: BTreeMap<String, String>,
    /// `:vX` → value
    pub values: BTreeMap<String, NativeValue>,
}

impl Condition {
    /// Shorthand for a comparison
    pub fn cmp(path: impl Into<String>, op: CmpOp, value: NativeValue) -> Self {
        Condition::Cmp {
            path: path.into(),
            op,
            value,
        }
    }

    /// Conjunction, flattening nested `And`s
    pub fn and_all(conditions: Vec<Condition>) -> Option<Condition> {
        let mut flat = Vec::new();
        for condition in conditions {
            match condition {
                Condition::And(children) => flat.extend(children),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Condition::And(flat)),
        }
    }

    /// Evaluate against a stored item
    ///
    /// Comparisons against an absent attribute are false, including `<>`.
    /// Across value kinds only `<>` holds.
    pub fn eval(&self, item: &NativeItem) -> bool {
        match self {
            Condition::Cmp { path, op, value } => {
                let Some(stored) = item.get(path) else {
                    return false;
                };
                match stored.compare(value) {
                    Some(ord) => match op {
                        CmpOp::Eq => ord.is_eq(),
                        CmpOp::Ne => !ord.is_eq(),
                        CmpOp::Lt => ord.is_lt(),
                        CmpOp::Le => ord.is_le(),
                        CmpOp::Gt => ord.is_gt(),
                        CmpOp::Ge => ord.is_ge(),
                    },
                    None => *op == CmpOp::Ne,
                }
            }
            Condition::Exists(path) => item.contains_key(path),
            Condition::NotExists(path) => !item.contains_key(path),
            Condition::BeginsWith(path, prefix) => item
                .get(path)
                .and_then(NativeValue::as_s)
                .map_or(false, |s| s.starts_with(prefix.as_str())),
            Condition::Contains(path, needle) => item
                .get(path)
                .and_then(NativeValue::as_s)
                .map_or(false, |s| s.contains(needle.as_str())),
            Condition::In(path, values) => item
                .get(path)
                .map_or(false, |stored| values.iter().any(|v| v == stored)),
            Condition::And(children) => children.iter().all(|c| c.eval(item)),
            Condition::Or(children) => children.iter().any(|c| c.eval(item)),
            Condition::Not(child) => !child.eval(item),
        }
    }

    /// Render as expression text with placeholders
    pub fn render(&self) -> RenderedCondition {
        let mut rendered = RenderedCondition::default();
        let mut expression = String::new();
        self.render_into(&mut expression, &mut rendered);
        rendered.expression = expression;
        rendered
    }

    fn render_into(&self, out: &mut String, ctx: &mut RenderedCondition) {
        match self {
            Condition::Cmp { path, op, value } => {
                let name = name_placeholder(ctx, path);
                let value = value_placeholder(ctx, value);
                let _ = write!(out, "{} {} {}", name, op.symbol(), value);
            }
            Condition::Exists(path) => {
                let name = name_placeholder(ctx, path);
                let _ = write!(out, "attribute_exists({})", name);
            }
            Condition::NotExists(path) => {
                let name = name_placeholder(ctx, path);
                let _ = write!(out, "attribute_not_exists({})", name);
            }
            Condition::BeginsWith(path, prefix) | Condition::Contains(path, prefix) => {
                let func = if matches!(self, Condition::BeginsWith(..)) {
                    "begins_with"
                } else {
                    "contains"
                };
                let name = name_placeholder(ctx, path);
                let value = value_placeholder(ctx, &NativeValue::S(prefix.clone()));
                let _ = write!(out, "{}({}, {})", func, name, value);
            }
            Condition::In(path, values) => {
                let name = name_placeholder(ctx, path);
                let values: Vec<String> = values.iter().map(|v| value_placeholder(ctx, v)).collect();
                let _ = write!(out, "{} IN ({})", name, values.join(", "));
            }
            Condition::And(children) | Condition::Or(children) => {
                let joiner = if matches!(self, Condition::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                out.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        out.push_str(joiner);
                    }
                    child.render_into(out, ctx);
                }
                out.push(')');
            }
            Condition::Not(child) => {
                out.push_str("NOT ");
                child.render_into(out, ctx);
            }
        }
    }
}

fn name_placeholder(ctx: &mut RenderedCondition, path: &str) -> String {
    if let Some((placeholder, _)) = ctx.names.iter().find(|(_, name)| name.as_str() == path) {
        return placeholder.clone();
    }
    let placeholder = format!("#n{}", ctx.names.len());
    ctx.names.insert(placeholder.clone(), path.to_string());
    placeholder
}

fn value_placeholder(ctx: &mut RenderedCondition, value: &NativeValue) -> String {
    let placeholder = format!(":v{}", ctx.values.len());
    ctx.values.insert(placeholder.clone(), value.clone());
    placeholder
}

/// Translates locked search filters into [`Condition`]s
pub struct PartitionFilterBuilder<'a> {
    meta: &'a StoreMeta,
    /// Attribute every stored item carries; `attribute_not_exists` on it is
    /// the always-false condition
    always_present: &'a str,
}

impl<'a> PartitionFilterBuilder<'a> {
    /// Builder for `meta`, using the table partition key as the always-present attribute
    pub fn new(meta: &'a StoreMeta, always_present: &'a str) -> Self {
        PartitionFilterBuilder {
            meta,
            always_present,
        }
    }

    /// Operands that would be rounded on conversion stay residual
    fn native(&self, attr_type: AttrType, value: &Value) -> Option<NativeValue> {
        to_native_exact(attr_type, value)
    }
}

impl NativeFilterBuilder for PartitionFilterBuilder<'_> {
    type Expr = Condition;

    fn attr_filter(&self, filter: &AttrFilter) -> Option<Condition> {
        let attr_type = self.meta.attr(&filter.name)?.attr_type;
        if filter.ignore_case {
            return None;
        }
        let path = filter.name.clone();
        if attr_type == AttrType::Json
            && !matches!(filter.op, FilterOp::Exists | FilterOp::NotExists)
        {
            return None;
        }
        let operand = filter.value().filter(|v| !v.is_null());
        let cmp = |op: CmpOp| -> Option<Condition> {
            Some(Condition::cmp(
                filter.name.clone(),
                op,
                self.native(attr_type, operand?)?,
            ))
        };
        match filter.op {
            FilterOp::Exists => Some(Condition::Exists(path)),
            FilterOp::NotExists => Some(Condition::NotExists(path)),
            FilterOp::Eq if operand.is_none() => Some(Condition::NotExists(path)),
            FilterOp::Ne if operand.is_none() => Some(Condition::Exists(path)),
            FilterOp::Eq => cmp(CmpOp::Eq),
            // `<>` is false on absent attributes, while `ne` holds there
            FilterOp::Ne => Some(Condition::Or(vec![
                Condition::NotExists(path.clone()),
                cmp(CmpOp::Ne)?,
            ])),
            FilterOp::Gt => cmp(CmpOp::Gt),
            FilterOp::Gte => cmp(CmpOp::Ge),
            FilterOp::Lt => cmp(CmpOp::Lt),
            FilterOp::Lte => cmp(CmpOp::Le),
            FilterOp::StartsWith => Some(Condition::BeginsWith(
                path,
                operand?.as_str()?.to_string(),
            )),
            FilterOp::Contains => Some(Condition::Contains(path, operand?.as_str()?.to_string())),
            FilterOp::EndsWith => None,
            FilterOp::OneOf => {
                let values = filter
                    .values()
                    .iter()
                    .map(|v| self.native(attr_type, v))
                    .collect::<Option<Vec<_>>>()?;
                if values.is_empty() {
                    return self.exclude_all();
                }
                Some(Condition::In(path, values))
            }
        }
    }

    fn and(&self, exprs: Vec<Condition>) -> Condition {
        Condition::And(exprs)
    }

    fn or(&self, exprs: Vec<Condition>) -> Condition {
        Condition::Or(exprs)
    }

    fn not(&self, expr: Condition) -> Condition {
        Condition::Not(Box::new(expr))
    }

    fn exclude_all(&self) -> Option<Condition> {
        Some(Condition::NotExists(self.always_present.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{item_from_native, item_to_native};
    use storekit_core::{build_native_expression, Attr, Item, SearchFilter};

    fn meta() -> StoreMeta {
        StoreMeta::builder("people")
            .attr(Attr::new("id", AttrType::Int))
            .attr(Attr::new("name", AttrType::Str))
            .attr(Attr::new("age", AttrType::Int))
            .attr(Attr::new("weight", AttrType::Float))
            .attr(Attr::new("extra", AttrType::Json))
            .key_attr("id")
            .build()
            .unwrap()
    }

    fn people() -> Vec<Item> {
        vec![
            Item::new()
                .with("id", 1)
                .with("name", "Ada")
                .with("age", 36)
                .with("weight", 0.123456789),
            Item::new()
                .with("id", 2)
                .with("name", "alan")
                .with("age", 41)
                .with("weight", 0.5),
            Item::new().with("id", 3).with("age", 12),
            Item::new()
                .with("id", 4)
                .with("name", "Grace")
                .with("extra", serde_json::json!({"x": 1})),
        ]
    }

    /// Native condition and residual together select what `matches` selects
    /// on the stored item
    fn assert_agrees(filter: SearchFilter) {
        let meta = meta();
        let locked = filter.lock_attrs(&meta.attrs).unwrap();
        let builder = PartitionFilterBuilder::new(&meta, "id");
        let native = build_native_expression(&locked, &builder);
        for item in people() {
            let stored = item_to_native(&meta, &item).unwrap();
            let item = item_from_native(&meta, &stored).unwrap();
            let native_ok = native.expr.as_ref().map_or(true, |c| c.eval(&stored));
            assert_eq!(
                native_ok && native.residual.matches(&item),
                locked.matches(&item),
                "filter {:?} on {:?}",
                locked,
                item
            );
        }
    }

    #[test]
    fn test_pushdown_agrees_with_matches() {
        assert_agrees(SearchFilter::eq("name", "Ada"));
        assert_agrees(SearchFilter::ne("name", "Ada"));
        assert_agrees(SearchFilter::eq("name", Value::Null));
        assert_agrees(SearchFilter::ne("name", Value::Null));
        assert_agrees(SearchFilter::gt("age", 20) & SearchFilter::lte("age", 41));
        assert_agrees(SearchFilter::starts_with("name", "A"));
        assert_agrees(SearchFilter::contains("name", "la"));
        assert_agrees(SearchFilter::ends_with("name", "ce"));
        assert_agrees(SearchFilter::one_of("age", [12, 36]));
        assert_agrees(SearchFilter::one_of("age", Vec::<i64>::new()));
        assert_agrees(SearchFilter::exists("extra"));
        assert_agrees(!SearchFilter::exists("name"));
        assert_agrees(SearchFilter::eq("name", "ada").ignore_case() | SearchFilter::lt("age", 20));
        assert_agrees(SearchFilter::query("a"));
    }

    #[test]
    fn test_pushdown_agrees_on_fine_float_operands() {
        assert_agrees(SearchFilter::eq("weight", 0.123456789));
        assert_agrees(SearchFilter::eq("weight", 0.1234567891));
        assert_agrees(SearchFilter::ne("weight", 0.1234567891));
        assert_agrees(SearchFilter::gt("weight", 0.1234567889));
        assert_agrees(SearchFilter::gte("weight", 0.1234567891));
        assert_agrees(SearchFilter::lt("weight", 0.1234567891));
        assert_agrees(SearchFilter::lte("weight", 0.4999999999));
        assert_agrees(SearchFilter::one_of("weight", [0.123456789, 0.5000000001]));
        assert_agrees(!SearchFilter::eq("weight", 0.5000000001));
        assert_agrees(SearchFilter::eq("weight", 0.5000000001) | SearchFilter::eq("name", "Ada"));
    }

    #[test]
    fn test_rounded_operand_stays_residual() {
        let meta = meta();
        let builder = PartitionFilterBuilder::new(&meta, "id");
        let filter = (SearchFilter::eq("weight", 0.1234567891) & SearchFilter::gt("age", 1))
            .lock_attrs(&meta.attrs)
            .unwrap();
        let native = build_native_expression(&filter, &builder);
        assert!(!native.fully_handled);
        assert_eq!(native.residual, SearchFilter::eq("weight", 0.1234567891));
        assert_eq!(
            native.expr,
            Some(Condition::cmp("age", CmpOp::Gt, NativeValue::N("1".into())))
        );
    }

    #[test]
    fn test_unsupported_ops_stay_residual() {
        let meta = meta();
        let builder = PartitionFilterBuilder::new(&meta, "id");
        let filter = (SearchFilter::ends_with("name", "e") & SearchFilter::gt("age", 1))
            .lock_attrs(&meta.attrs)
            .unwrap();
        let native = build_native_expression(&filter, &builder);
        assert!(!native.fully_handled);
        assert_eq!(native.residual, SearchFilter::ends_with("name", "e"));
        assert_eq!(
            native.expr,
            Some(Condition::cmp("age", CmpOp::Gt, NativeValue::N("1".into())))
        );
    }

    #[test]
    fn test_render_placeholders() {
        let condition = Condition::And(vec![
            Condition::cmp("age", CmpOp::Ge, NativeValue::N("18".into())),
            Condition::Or(vec![
                Condition::NotExists("name".into()),
                Condition::BeginsWith("name".into(), "A".into()),
            ]),
            Condition::Not(Box::new(Condition::In(
                "age".into(),
                vec![NativeValue::N("20".into()), NativeValue::N("30".into())],
            ))),
        ]);
        let rendered = condition.render();
        assert_eq!(
            rendered.expression,
            "(#n0 >= :v0 AND (attribute_not_exists(#n1) OR begins_with(#n1, :v1)) AND NOT #n0 IN (:v2, :v3))"
        );
        assert_eq!(rendered.names.len(), 2);
        assert_eq!(rendered.values.len(), 4);
    }

    #[test]
    fn test_absent_attribute_comparisons_are_false() {
        let item = NativeItem::new();
        assert!(!Condition::cmp("a", CmpOp::Ne, NativeValue::N("1".into())).eval(&item));
        assert!(Condition::NotExists("a".into()).eval(&item));
    }
}
