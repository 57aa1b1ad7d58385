//! Field comparison with domain tolerance
//!
//! Snapshots hold plain JSON values. Whether two values of a field are "the
//! same" depends on what the field is: money compares as rounded decimals,
//! identifiers compare by their string form, relations-to-many compare as
//! multisets of ids. Fields of embedded sub-records are captured under
//! `{collection}.{id}.{field}` keys and compared like top-level fields.
//! A [`Schema`] declares the non-scalar fields of an entity
//! and a [`Comparator`] applies the rules.

use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    /// Compared as decimals rounded to the configured minor-unit precision.
    Money,
    /// Line-item identifier, both sides coerced to strings.
    Identifier,
    /// Relation-to-many, captured as a sorted list of ids.
    ToMany,
    /// One-to-one relation, flattened into `name.field` keys on capture.
    OneToOne,
    /// Collection of owned sub-records. Captured as the sorted id list plus
    /// one `name.{id}.field` key per sub-record field.
    Embedded,
    /// Scalar for which null and the empty string are different values.
    NonNull,
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    kinds: HashMap<&'static str, FieldKind>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: FieldKind, fields: &[&'static str]) -> Self {
        for field in fields {
            self.kinds.insert(field, kind);
        }
        self
    }

    pub fn kind(&self, field: &str) -> FieldKind {
        if let Some(kind) = self.kinds.get(field) {
            return *kind;
        }
        // `frs.{id}.fr_number` is declared as `frs.fr_number`
        if let [collection, _, sub] = field.splitn(3, '.').collect::<Vec<_>>()[..] {
            if self.kinds.get(collection) == Some(&FieldKind::Embedded) {
                if let Some(kind) = self.kinds.get(format!("{collection}.{sub}").as_str()) {
                    return *kind;
                }
            }
        }
        if field.ends_with("_amt") {
            return FieldKind::Money;
        }
        FieldKind::Scalar
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Comparator<'a> {
    schema: &'a Schema,
    rounding: u32,
}

impl<'a> Comparator<'a> {
    pub fn new(schema: &'a Schema, rounding: u32) -> Self {
        Self { schema, rounding }
    }

    pub fn equal(&self, field: &str, a: &Value, b: &Value) -> bool {
        match self.schema.kind(field) {
            FieldKind::Money => money_equal(a, b, self.rounding),
            FieldKind::Identifier => as_text(a) == as_text(b),
            FieldKind::ToMany | FieldKind::Embedded => ids_equal(a, b),
            FieldKind::NonNull => a == b,
            FieldKind::Scalar | FieldKind::OneToOne => blank_equal(a, b),
        }
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn money_equal(a: &Value, b: &Value, rounding: u32) -> bool {
    match (as_decimal(a), as_decimal(b)) {
        (Some(x), Some(y)) => x.round_dp(rounding) == y.round_dp(rounding),
        _ => blank_equal(a, b),
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn sorted_ids(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Null => Some(Vec::new()),
        Value::Array(items) => {
            let mut ids: Vec<String> = items.iter().filter_map(as_text).collect();
            ids.sort();
            Some(ids)
        }
        _ => None,
    }
}

fn ids_equal(a: &Value, b: &Value) -> bool {
    match (sorted_ids(a), sorted_ids(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn blank_equal(a: &Value, b: &Value) -> bool {
    (is_blank(a) && is_blank(b)) || a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new()
            .with(FieldKind::Money, &["planned_budget.unicef_cash"])
            .with(FieldKind::Identifier, &["fr_number"])
            .with(FieldKind::ToMany, &["frs"])
            .with(FieldKind::NonNull, &["title"])
    }

    fn embedded_schema() -> Schema {
        Schema::new()
            .with(FieldKind::Embedded, &["frs"])
            .with(FieldKind::Identifier, &["frs.fr_number"])
    }

    #[test]
    fn money_compares_rounded() {
        let schema = schema();
        let cmp = Comparator::new(&schema, 2);

        assert!(cmp.equal("total_amt", &json!("100.001"), &json!("100.00")));
        assert!(cmp.equal("planned_budget.unicef_cash", &json!("10"), &json!(10.0)));
        assert!(!cmp.equal("actual_amt", &json!("90"), &json!("100")));
    }

    #[test]
    fn identifiers_coerce_to_text() {
        let schema = schema();
        let cmp = Comparator::new(&schema, 2);

        assert!(cmp.equal("fr_number", &json!(1234), &json!("1234")));
        assert!(!cmp.equal("fr_number", &json!(1234), &json!("1235")));
    }

    #[test]
    fn relations_compare_as_multisets() {
        let schema = schema();
        let cmp = Comparator::new(&schema, 2);

        assert!(cmp.equal("frs", &json!(["b", "a"]), &json!(["a", "b"])));
        assert!(!cmp.equal("frs", &json!(["a", "a"]), &json!(["a"])));
        assert!(cmp.equal("frs", &Value::Null, &json!([])));
    }

    #[test]
    fn blank_and_null_only_differ_for_non_null_fields() {
        let schema = schema();
        let cmp = Comparator::new(&schema, 2);

        assert!(cmp.equal("attached_agreement", &Value::Null, &json!("")));
        assert!(!cmp.equal("title", &Value::Null, &json!("")));
    }

    #[test]
    fn embedded_fields_resolve_through_their_collection() {
        let schema = embedded_schema();
        let cmp = Comparator::new(&schema, 2);

        assert_eq!(schema.kind("frs.fr1.fr_number"), FieldKind::Identifier);
        assert_eq!(schema.kind("frs.fr1.actual_amt"), FieldKind::Money);
        assert_eq!(schema.kind("frs.fr1.start_date"), FieldKind::Scalar);
        assert!(cmp.equal("frs.fr1.fr_number", &json!(400), &json!("400")));
        assert!(cmp.equal("frs.fr1.actual_amt", &json!("90.001"), &json!("90")));
        assert!(!cmp.equal("frs.fr1.actual_amt", &json!("90"), &json!("100")));
    }
}
