//! Field predicates for `fetch_all` and `batch_delete_matching`.
//!
//! A [`Predicate`] is a conjunction of clauses over a record's top-level
//! fields. Clauses are evaluated against the record's dynamic value, so any
//! record that serializes as a map can be filtered.
//!
//! ```rust,ignore
//! let adults = Predicate::field("age").ge(18u32).and("city").eq("Lisbon");
//! let rows = manager.fetch_all::<Person>(Some(&adults))?;
//! ```

use sealstore_codec::Value;
use std::cmp::Ordering;

/// Comparison applied by a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Field equals operand.
    Eq,
    /// Field differs from operand.
    Ne,
    /// Field is less than operand.
    Lt,
    /// Field is less than or equal to operand.
    Le,
    /// Field is greater than operand.
    Gt,
    /// Field is greater than or equal to operand.
    Ge,
    /// Field is present and not null.
    Exists,
}

/// A single condition on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    field: String,
    comparison: Comparison,
    operand: Value,
}

impl Clause {
    /// Returns the field this clause tests.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the comparison.
    #[must_use]
    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    fn matches(&self, fields: &[(Value, Value)]) -> bool {
        let value = fields
            .iter()
            .find(|(key, _)| key.as_text() == Some(self.field.as_str()))
            .map(|(_, value)| value);

        // A missing field satisfies no comparison, including `Ne`.
        let Some(value) = value else {
            return false;
        };

        let ordering = compare(value, &self.operand);
        match self.comparison {
            Comparison::Exists => !value.is_null(),
            Comparison::Eq => ordering == Some(Ordering::Equal),
            Comparison::Ne => ordering != Some(Ordering::Equal),
            Comparison::Lt => ordering == Some(Ordering::Less),
            Comparison::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Comparison::Gt => ordering == Some(Ordering::Greater),
            Comparison::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

/// Conjunction of field clauses. The empty predicate matches everything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// Creates a predicate that matches every record.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Starts a predicate with a clause on `field`.
    #[must_use]
    pub fn field(field: impl Into<String>) -> ClauseBuilder {
        Self::all().and(field)
    }

    /// Adds another clause on `field`.
    #[must_use]
    pub fn and(self, field: impl Into<String>) -> ClauseBuilder {
        ClauseBuilder {
            predicate: self,
            field: field.into(),
        }
    }

    /// Returns the clauses.
    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Iterates over the field names referenced by this predicate.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(Clause::field)
    }

    /// Evaluates the predicate against a record value.
    ///
    /// A value that is not a map only matches the empty predicate.
    #[must_use]
    pub fn matches(&self, record: &Value) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        match record {
            Value::Map(fields) => self.clauses.iter().all(|clause| clause.matches(fields)),
            _ => false,
        }
    }
}

/// Builder for the comparison half of a clause.
#[derive(Debug, Clone)]
#[must_use = "a clause builder does nothing until a comparison is chosen"]
pub struct ClauseBuilder {
    predicate: Predicate,
    field: String,
}

impl ClauseBuilder {
    fn push(mut self, comparison: Comparison, operand: Value) -> Predicate {
        self.predicate.clauses.push(Clause {
            field: self.field,
            comparison,
            operand,
        });
        self.predicate
    }

    /// Field equals `value`.
    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.push(Comparison::Eq, value.into())
    }

    /// Field differs from `value`.
    pub fn ne(self, value: impl Into<Value>) -> Predicate {
        self.push(Comparison::Ne, value.into())
    }

    /// Field is less than `value`.
    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.push(Comparison::Lt, value.into())
    }

    /// Field is less than or equal to `value`.
    pub fn le(self, value: impl Into<Value>) -> Predicate {
        self.push(Comparison::Le, value.into())
    }

    /// Field is greater than `value`.
    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.push(Comparison::Gt, value.into())
    }

    /// Field is greater than or equal to `value`.
    pub fn ge(self, value: impl Into<Value>) -> Predicate {
        self.push(Comparison::Ge, value.into())
    }

    /// Field is present and not null.
    pub fn exists(self) -> Predicate {
        self.push(Comparison::Exists, Value::Null)
    }
}

/// Orders two scalar values. Values of unrelated kinds are incomparable.
#[allow(clippy::cast_precision_loss)]
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
        (Value::Integer(a), Value::Float(b)) => (i128::from(*a) as f64).partial_cmp(b),
        (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(i128::from(*b) as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Array(_) | Value::Map(_), _) if left == right => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Person {
        name: &'static str,
        age: u32,
        score: f64,
        nickname: Option<&'static str>,
    }

    fn person(name: &'static str, age: u32, nickname: Option<&'static str>) -> Value {
        sealstore_codec::to_value(&Person {
            name,
            age,
            score: 7.5,
            nickname,
        })
        .unwrap()
    }

    #[test]
    fn empty_predicate_matches_anything() {
        assert!(Predicate::all().matches(&person("a", 1, None)));
        assert!(Predicate::all().matches(&Value::Integer(3.into())));
    }

    #[test]
    fn equality_and_inequality() {
        let ada = person("Ada", 36, None);
        assert!(Predicate::field("name").eq("Ada").matches(&ada));
        assert!(!Predicate::field("name").eq("Bob").matches(&ada));
        assert!(Predicate::field("name").ne("Bob").matches(&ada));
    }

    #[test]
    fn ordering_across_numeric_kinds() {
        let ada = person("Ada", 36, None);
        assert!(Predicate::field("age").gt(30u32).matches(&ada));
        assert!(Predicate::field("age").le(36i64).matches(&ada));
        assert!(!Predicate::field("age").lt(36u8).matches(&ada));
        assert!(Predicate::field("age").lt(36.5f64).matches(&ada));
        assert!(Predicate::field("score").ge(7u32).matches(&ada));
    }

    #[test]
    fn conjunction_requires_all() {
        let ada = person("Ada", 36, Some("countess"));
        let both = Predicate::field("age").ge(18u32).and("name").eq("Ada");
        let one = Predicate::field("age").ge(18u32).and("name").eq("Bob");
        assert!(both.matches(&ada));
        assert!(!one.matches(&ada));
        assert_eq!(both.fields().collect::<Vec<_>>(), ["age", "name"]);
    }

    #[test]
    fn exists_and_missing_fields() {
        let with = person("Ada", 36, Some("countess"));
        let without = person("Bob", 40, None);
        assert!(Predicate::field("nickname").exists().matches(&with));
        assert!(!Predicate::field("nickname").exists().matches(&without));
        assert!(!Predicate::field("email").ne("x").matches(&with));
    }

    #[test]
    fn mismatched_kinds_never_match() {
        let ada = person("Ada", 36, None);
        assert!(!Predicate::field("age").eq("36").matches(&ada));
        assert!(!Predicate::field("age").lt("99").matches(&ada));
        assert!(!Predicate::field("name").eq("Ada").matches(&Value::Text("Ada".into())));
    }
}
