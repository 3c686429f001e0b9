//! Filters and sort keys for listing local records.
//!
//! This is deliberately small: per-field equality/range conditions joined
//! with AND, and a multi-key sort. Filtering runs inside the storage scan so
//! rejected documents are never materialised.

use serde_json::Value;
use std::cmp::Ordering;
use tidemark_storage::Document;

/// A condition on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `$eq`
    Eq(Value),
    /// `$gt`
    Gt(Value),
    /// `$gte`
    Gte(Value),
    /// `$lt`
    Lt(Value),
    /// `$lte`
    Lte(Value),
    /// `$in`
    In(Vec<Value>),
}

impl Condition {
    /// Parses the `{"$op": value}` form.
    ///
    /// A bare value is an equality condition.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        let Some(object) = value.as_object().filter(|o| o.len() == 1) else {
            return Some(Self::Eq(value.clone()));
        };
        let (op, operand) = object.iter().next()?;
        match op.as_str() {
            "$eq" => Some(Self::Eq(operand.clone())),
            "$gt" => Some(Self::Gt(operand.clone())),
            "$gte" => Some(Self::Gte(operand.clone())),
            "$lt" => Some(Self::Lt(operand.clone())),
            "$lte" => Some(Self::Lte(operand.clone())),
            "$in" => operand.as_array().map(|values| Self::In(values.clone())),
            _ if op.starts_with('$') => None,
            _ => Some(Self::Eq(value.clone())),
        }
    }

    /// Evaluates the condition against a field value (`None` when absent).
    #[must_use]
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        match self {
            Self::Eq(expected) => same_kind_cmp(actual, expected) == Some(Ordering::Equal),
            Self::Gt(bound) => same_kind_cmp(actual, bound) == Some(Ordering::Greater),
            Self::Gte(bound) => matches!(
                same_kind_cmp(actual, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt(bound) => same_kind_cmp(actual, bound) == Some(Ordering::Less),
            Self::Lte(bound) => matches!(
                same_kind_cmp(actual, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::In(candidates) => candidates
                .iter()
                .any(|c| same_kind_cmp(actual, c) == Some(Ordering::Equal)),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Field to compare.
    pub field: String,
    /// Direction.
    pub direction: Direction,
}

impl SortKey {
    /// Ascending key.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    /// Descending key.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }

    /// Parses `"-last_modified,title"` style order strings.
    #[must_use]
    pub fn parse_list(order: &str) -> Vec<Self> {
        order
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "-")
            .map(|s| match s.strip_prefix('-') {
                Some(field) => Self::desc(field),
                None => Self::asc(s),
            })
            .collect()
    }
}

/// A listing query: AND-ed field conditions plus a sort order.
///
/// ```
/// use tidemark_core::{Condition, Query, SortKey};
/// use serde_json::json;
///
/// let query = Query::new()
///     .filter("done", Condition::Eq(json!(false)))
///     .filter("priority", Condition::Gte(json!(2)))
///     .order_by(SortKey::desc("priority"))
///     .order_by(SortKey::asc("title"));
/// assert_eq!(query.fields().count(), 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Field conditions, all of which must hold.
    pub filters: Vec<(String, Condition)>,
    /// Sort keys, compared left to right.
    pub order: Vec<SortKey>,
}

impl Query {
    /// An unfiltered, id-ordered query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field condition.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.filters.push((field.into(), condition));
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn order_by(mut self, key: SortKey) -> Self {
        self.order.push(key);
        self
    }

    /// Every field the query reads, filters first.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.filters
            .iter()
            .map(|(f, _)| f.as_str())
            .chain(self.order.iter().map(|k| k.field.as_str()))
    }

    /// Returns true if the stored document satisfies every filter.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, condition)| condition.matches(doc.get(field)))
    }

    /// Orders two stored documents by the sort keys, then by id.
    #[must_use]
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.order {
            let ord = compare_values(a.get(&key.field), b.get(&key.field));
            let ord = match key.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        compare_values(a.get("id"), b.get("id"))
    }
}

fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order over optional JSON values used for sorting.
///
/// Missing and null sort first, then booleans, numbers, strings, arrays and
/// objects. Numbers compare numerically across integer and float forms.
#[must_use]
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(Some(l), Some(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            Value::Object(x.clone()).to_string().cmp(&Value::Object(y.clone()).to_string())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Compares only values of the same kind; mixed kinds never match a filter.
fn same_kind_cmp(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let actual_rank = rank(actual);
    if actual_rank != rank(Some(expected)) {
        return None;
    }
    Some(compare_values(actual, Some(expected)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn comparison_conditions() {
        let d = doc(json!({"n": 5, "s": "m"}));
        assert!(Condition::Gt(json!(4)).matches(d.get("n")));
        assert!(!Condition::Gt(json!(5)).matches(d.get("n")));
        assert!(Condition::Gte(json!(5)).matches(d.get("n")));
        assert!(Condition::Lt(json!(5.5)).matches(d.get("n")));
        assert!(Condition::Lte(json!("m")).matches(d.get("s")));
        assert!(Condition::In(vec![json!(1), json!(5)]).matches(d.get("n")));
        assert!(!Condition::Eq(json!(5)).matches(d.get("missing")));
    }

    #[test]
    fn mixed_kinds_never_match() {
        let d = doc(json!({"n": 5}));
        assert!(!Condition::Gt(json!("4")).matches(d.get("n")));
        assert!(!Condition::Eq(json!("5")).matches(d.get("n")));
    }

    #[test]
    fn integer_and_float_are_equal() {
        assert!(Condition::Eq(json!(1.0)).matches(Some(&json!(1))));
    }

    #[test]
    fn condition_from_json() {
        assert_eq!(
            Condition::from_json(&json!({"$gte": 3})),
            Some(Condition::Gte(json!(3)))
        );
        assert_eq!(Condition::from_json(&json!("x")), Some(Condition::Eq(json!("x"))));
        assert_eq!(Condition::from_json(&json!({"$regex": "x"})), None);
        assert_eq!(Condition::from_json(&json!({"$in": 3})), None);
    }

    #[test]
    fn multi_key_sort_breaks_ties_left_to_right() {
        let query = Query::new()
            .order_by(SortKey::desc("priority"))
            .order_by(SortKey::asc("title"));
        let mut docs = vec![
            doc(json!({"id": "1", "priority": 1, "title": "b"})),
            doc(json!({"id": "2", "priority": 2, "title": "z"})),
            doc(json!({"id": "3", "priority": 2, "title": "a"})),
            doc(json!({"id": "4", "priority": 1, "title": "a"})),
        ];
        docs.sort_by(|a, b| query.compare(a, b));
        let ids: Vec<_> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["3", "2", "4", "1"]);
    }

    #[test]
    fn parse_order_string() {
        assert_eq!(
            SortKey::parse_list("-last_modified, title,"),
            vec![SortKey::desc("last_modified"), SortKey::asc("title")]
        );
    }

    #[test]
    fn missing_values_sort_first() {
        assert_eq!(compare_values(None, Some(&json!(0))), Ordering::Less);
        assert_eq!(compare_values(Some(&Value::Null), None), Ordering::Equal);
    }

    proptest! {
        #[test]
        fn sort_is_ordered_by_key(values in proptest::collection::vec(any::<i64>(), 0..40)) {
            let query = Query::new().order_by(SortKey::asc("n"));
            let mut docs: Vec<Document> = values
                .iter()
                .enumerate()
                .map(|(i, n)| doc(json!({"id": format!("{i:03}"), "n": n})))
                .collect();
            docs.sort_by(|a, b| query.compare(a, b));
            for pair in docs.windows(2) {
                prop_assert!(pair[0]["n"].as_i64() <= pair[1]["n"].as_i64());
            }
        }
    }
}
