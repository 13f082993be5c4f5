// ============================================================================
// Sorting
// ============================================================================
//
// `Sort` is the caller-facing ordering (derived `OrderBy...` suffixes,
// `ORDER BY`, page requests). Rows are sorted on pre-extracted keys so that
// related-entity values can be part of a key.
//
// NULLs sort last ascending and first descending.
//
// ============================================================================

use crate::core::{Result, Value};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn is_descending(&self) -> bool {
        matches!(self, Self::Desc)
    }
}

/// Order by one property, `field` or `relation.field`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
    pub ignore_case: bool,
}

impl Order {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Asc,
            ignore_case: false,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Desc,
            ignore_case: false,
        }
    }

    pub fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        write!(f, "{} {}", self.property, direction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by(direction: Direction, properties: &[&str]) -> Self {
        Self {
            orders: properties
                .iter()
                .map(|property| Order {
                    property: property.to_string(),
                    direction,
                    ignore_case: false,
                })
                .collect(),
        }
    }

    pub fn from_orders(orders: Vec<Order>) -> Self {
        Self { orders }
    }

    /// Append the orders of `other` after this one's.
    pub fn and(mut self, other: Sort) -> Self {
        self.orders.extend(other.orders);
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_sorted(&self) -> bool {
        !self.orders.is_empty()
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.orders.is_empty() {
            return write!(f, "UNSORTED");
        }
        let parts: Vec<String> = self.orders.iter().map(Order::to_string).collect();
        write!(f, "{}", parts.join(", "))
    }
}

fn compare_key(a: &Value, b: &Value, order: &Order) -> Result<Ordering> {
    let ordering = match (a, b) {
        (Value::Text(x), Value::Text(y)) if order.ignore_case => {
            x.to_lowercase().cmp(&y.to_lowercase())
        }
        _ => a.compare(b)?,
    };
    Ok(if order.direction.is_descending() {
        ordering.reverse()
    } else {
        ordering
    })
}

/// Compare two extracted key tuples, one value per order.
pub fn compare_keys(a: &[Value], b: &[Value], orders: &[Order]) -> Result<Ordering> {
    for ((x, y), order) in a.iter().zip(b.iter()).zip(orders) {
        let ordering = compare_key(x, y, order)?;
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
    }
    Ok(Ordering::Equal)
}

/// Stable sort of `(key, item)` pairs. The first comparison error aborts.
pub fn sort_keyed<T>(items: &mut [(Vec<Value>, T)], orders: &[Order]) -> Result<()> {
    if items.len() < 2 || orders.is_empty() {
        return Ok(());
    }

    let mut failure = None;
    items.sort_by(|(a, _), (b, _)| match compare_keys(a, b, orders) {
        Ok(ordering) => ordering,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RepoError;

    fn keyed(values: &[Value]) -> Vec<(Vec<Value>, usize)> {
        values
            .iter()
            .enumerate()
            .map(|(idx, v)| (vec![v.clone()], idx))
            .collect()
    }

    fn order_of(items: &[(Vec<Value>, usize)]) -> Vec<usize> {
        items.iter().map(|(_, idx)| *idx).collect()
    }

    #[test]
    fn test_sort_ascending_nulls_last() {
        let mut items = keyed(&[Value::Integer(3), Value::Null, Value::Integer(1)]);
        sort_keyed(&mut items, &[Order::asc("age")]).unwrap();
        assert_eq!(order_of(&items), vec![2, 0, 1]);
    }

    #[test]
    fn test_sort_descending_nulls_first() {
        let mut items = keyed(&[Value::Integer(3), Value::Null, Value::Integer(1)]);
        sort_keyed(&mut items, &[Order::desc("age")]).unwrap();
        assert_eq!(order_of(&items), vec![1, 0, 2]);
    }

    #[test]
    fn test_multi_key_and_stability() {
        let mut items = vec![
            (vec![Value::Integer(10), Value::from("b")], 0),
            (vec![Value::Integer(20), Value::from("a")], 1),
            (vec![Value::Integer(10), Value::from("a")], 2),
            (vec![Value::Integer(10), Value::from("a")], 3),
        ];
        let orders = [Order::desc("age"), Order::asc("username")];
        sort_keyed(&mut items, &orders).unwrap();
        assert_eq!(order_of(&items), vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_ignore_case() {
        let mut items = keyed(&[Value::from("b"), Value::from("A")]);
        sort_keyed(&mut items, &[Order::asc("username").ignoring_case()]).unwrap();
        assert_eq!(order_of(&items), vec![1, 0]);
    }

    #[test]
    fn test_incomparable_keys_fail() {
        let mut items = keyed(&[Value::from("x"), Value::Integer(1)]);
        let err = sort_keyed(&mut items, &[Order::asc("username")]).unwrap_err();
        assert!(matches!(err, RepoError::TypeMismatch(_)));
    }

    #[test]
    fn test_sort_and_display() {
        let sort = Sort::by(Direction::Desc, &["age"]).and(Sort::by(Direction::Asc, &["username"]));
        assert_eq!(sort.to_string(), "age DESC, username ASC");
        assert!(!Sort::unsorted().is_sorted());
    }
}
