//! Q objects for composable filters.
//!
//! Every field name in a filter reaches SQL as an identifier, so
//! [`Q::validate`] checks each one against the identifier whitelist before a
//! statement is built. Values are always bound as parameters.

use std::fmt;

use tether_core::{validate_identifier, IdentifierError, SqlValue, ToSqlValue};

/// A filter expression that can be combined with other expressions.
///
/// # Example
///
/// ```
/// use tether::Q;
///
/// let q = Q::eq("status", "active").and(Q::gt("age", 18).or(Q::eq("verified", true)));
/// let (sql, params) = q.build();
/// assert_eq!(sql, "(status = ?) AND ((age > ?) OR (verified = ?))");
/// assert_eq!(params.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct Q {
    expr: FilterExpr,
}

/// Filter expression tree.
#[derive(Debug, Clone)]
pub enum FilterExpr {
    /// `field op ?`
    Comparison {
        /// Column name.
        field: String,
        /// Operator.
        op: CompareOp,
        /// Bound value.
        value: SqlValue,
    },
    /// `field IS NULL`
    IsNull {
        /// Column name.
        field: String,
    },
    /// `field IS NOT NULL`
    IsNotNull {
        /// Column name.
        field: String,
    },
    /// `field IN (...)`; an empty list matches nothing.
    InList {
        /// Column name.
        field: String,
        /// Bound values.
        values: Vec<SqlValue>,
    },
    /// `field NOT IN (...)`; an empty list matches everything.
    NotInList {
        /// Column name.
        field: String,
        /// Bound values.
        values: Vec<SqlValue>,
    },
    /// `field LIKE ?`
    Like {
        /// Column name.
        field: String,
        /// Pattern, `%` and `_` wildcards.
        pattern: String,
    },
    /// `field BETWEEN ? AND ?`
    Between {
        /// Column name.
        field: String,
        /// Lower bound.
        low: SqlValue,
        /// Upper bound.
        high: SqlValue,
    },
    /// Both sides hold.
    And(Box<FilterExpr>, Box<FilterExpr>),
    /// Either side holds.
    Or(Box<FilterExpr>, Box<FilterExpr>),
    /// Negation.
    Not(Box<FilterExpr>),
    /// Matches no row.
    Nothing,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (=)
    Eq,
    /// Not equal (!=)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "!="),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
        }
    }
}

impl Q {
    fn compare<V: ToSqlValue>(field: &str, op: CompareOp, value: V) -> Self {
        Self {
            expr: FilterExpr::Comparison {
                field: field.to_string(),
                op,
                value: value.to_sql_value(),
            },
        }
    }

    /// Creates an equality filter (field = value).
    pub fn eq<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    /// Creates an inequality filter (field != value).
    pub fn ne<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    /// Creates a greater-than filter (field > value).
    pub fn gt<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    /// Creates a greater-than-or-equal filter (field >= value).
    pub fn gte<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Gte, value)
    }

    /// Creates a less-than filter (field < value).
    pub fn lt<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    /// Creates a less-than-or-equal filter (field <= value).
    pub fn lte<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Lte, value)
    }

    /// Creates an IS NULL filter.
    pub fn is_null(field: &str) -> Self {
        Self {
            expr: FilterExpr::IsNull {
                field: field.to_string(),
            },
        }
    }

    /// Creates an IS NOT NULL filter.
    pub fn is_not_null(field: &str) -> Self {
        Self {
            expr: FilterExpr::IsNotNull {
                field: field.to_string(),
            },
        }
    }

    /// Creates an IN list filter.
    pub fn in_list<V: ToSqlValue>(field: &str, values: Vec<V>) -> Self {
        Self {
            expr: FilterExpr::InList {
                field: field.to_string(),
                values: values.into_iter().map(ToSqlValue::to_sql_value).collect(),
            },
        }
    }

    /// Creates a NOT IN list filter.
    pub fn not_in_list<V: ToSqlValue>(field: &str, values: Vec<V>) -> Self {
        Self {
            expr: FilterExpr::NotInList {
                field: field.to_string(),
                values: values.into_iter().map(ToSqlValue::to_sql_value).collect(),
            },
        }
    }

    /// Creates a LIKE filter. Use `%` for wildcard matching.
    pub fn like(field: &str, pattern: &str) -> Self {
        Self {
            expr: FilterExpr::Like {
                field: field.to_string(),
                pattern: pattern.to_string(),
            },
        }
    }

    /// Creates a contains filter (LIKE %value%).
    pub fn contains(field: &str, value: &str) -> Self {
        Self::like(field, &format!("%{value}%"))
    }

    /// Creates a starts-with filter (LIKE value%).
    pub fn startswith(field: &str, value: &str) -> Self {
        Self::like(field, &format!("{value}%"))
    }

    /// Creates an ends-with filter (LIKE %value).
    pub fn endswith(field: &str, value: &str) -> Self {
        Self::like(field, &format!("%{value}"))
    }

    /// Creates a BETWEEN filter (low <= field <= high).
    pub fn between<V: ToSqlValue>(field: &str, low: V, high: V) -> Self {
        Self {
            expr: FilterExpr::Between {
                field: field.to_string(),
                low: low.to_sql_value(),
                high: high.to_sql_value(),
            },
        }
    }

    /// A filter matching no row.
    #[must_use]
    pub const fn nothing() -> Self {
        Self {
            expr: FilterExpr::Nothing,
        }
    }

    /// Combines this filter with another using AND.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self {
            expr: FilterExpr::And(Box::new(self.expr), Box::new(other.expr)),
        }
    }

    /// Combines this filter with another using OR.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self {
            expr: FilterExpr::Or(Box::new(self.expr), Box::new(other.expr)),
        }
    }

    /// Negates this filter with NOT.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self {
            expr: FilterExpr::Not(Box::new(self.expr)),
        }
    }

    /// Returns the internal filter expression.
    #[must_use]
    pub fn into_expr(self) -> FilterExpr {
        self.expr
    }

    /// Builds the SQL condition and parameters.
    #[must_use]
    pub fn build(&self) -> (String, Vec<SqlValue>) {
        self.expr.build()
    }

    /// Checks every field name against the identifier whitelist.
    ///
    /// # Errors
    ///
    /// Returns the first offending identifier.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        self.expr.validate()
    }
}

impl From<Q> for FilterExpr {
    fn from(q: Q) -> Self {
        q.expr
    }
}

impl FilterExpr {
    /// Field names referenced by this expression, in order of appearance.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_fields(&mut names);
        names
    }

    fn collect_fields<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Comparison { field, .. }
            | Self::IsNull { field }
            | Self::IsNotNull { field }
            | Self::InList { field, .. }
            | Self::NotInList { field, .. }
            | Self::Like { field, .. }
            | Self::Between { field, .. } => names.push(field),
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect_fields(names);
                right.collect_fields(names);
            }
            Self::Not(inner) => inner.collect_fields(names),
            Self::Nothing => {}
        }
    }

    pub(crate) fn validate(&self) -> Result<(), IdentifierError> {
        self.field_names()
            .into_iter()
            .try_for_each(validate_identifier)
    }

    /// Builds SQL and parameters from this expression.
    pub(crate) fn build(&self) -> (String, Vec<SqlValue>) {
        match self {
            Self::Comparison { field, op, value } => {
                (format!("{field} {op} ?"), vec![value.clone()])
            }
            Self::IsNull { field } => (format!("{field} IS NULL"), vec![]),
            Self::IsNotNull { field } => (format!("{field} IS NOT NULL"), vec![]),
            Self::InList { values, .. } if values.is_empty() => (String::from("1 = 0"), vec![]),
            Self::InList { field, values } => (
                format!("{field} IN ({})", placeholders(values.len())),
                values.clone(),
            ),
            Self::NotInList { values, .. } if values.is_empty() => {
                (String::from("1 = 1"), vec![])
            }
            Self::NotInList { field, values } => (
                format!("{field} NOT IN ({})", placeholders(values.len())),
                values.clone(),
            ),
            Self::Like { field, pattern } => (
                format!("{field} LIKE ?"),
                vec![SqlValue::Text(pattern.clone())],
            ),
            Self::Between { field, low, high } => (
                format!("{field} BETWEEN ? AND ?"),
                vec![low.clone(), high.clone()],
            ),
            Self::And(left, right) => {
                let (left_sql, mut left_params) = left.build();
                let (right_sql, right_params) = right.build();
                left_params.extend(right_params);
                (format!("({left_sql}) AND ({right_sql})"), left_params)
            }
            Self::Or(left, right) => {
                let (left_sql, mut left_params) = left.build();
                let (right_sql, right_params) = right.build();
                left_params.extend(right_params);
                (format!("({left_sql}) OR ({right_sql})"), left_params)
            }
            Self::Not(inner) => {
                let (inner_sql, params) = inner.build();
                (format!("NOT ({inner_sql})"), params)
            }
            Self::Nothing => (String::from("1 = 0"), vec![]),
        }
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_eq() {
        let q = Q::eq("status", "active");
        let (sql, params) = q.build();
        assert_eq!(sql, "status = ?");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_or_combination() {
        let q = Q::eq("role", "admin").or(Q::eq("role", "moderator"));
        let (sql, params) = q.build();
        assert_eq!(sql, "(role = ?) OR (role = ?)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_not() {
        let q = Q::eq("deleted", true).not();
        let (sql, params) = q.build();
        assert_eq!(sql, "NOT (deleted = ?)");
        assert_eq!(params, vec![SqlValue::Bool(true)]);
    }

    #[test]
    fn test_in_list() {
        let q = Q::in_list("status", vec!["active", "pending"]);
        let (sql, params) = q.build();
        assert_eq!(sql, "status IN (?, ?)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let (sql, params) = Q::in_list::<i64>("id", vec![]).build();
        assert_eq!(sql, "1 = 0");
        assert!(params.is_empty());
        let (sql, _) = Q::not_in_list::<i64>("id", vec![]).build();
        assert_eq!(sql, "1 = 1");
    }

    #[test]
    fn test_contains() {
        let q = Q::contains("email", "@example.com");
        let (sql, params) = q.build();
        assert_eq!(sql, "email LIKE ?");
        assert_eq!(params[0], SqlValue::Text("%@example.com%".to_string()));
    }

    #[test]
    fn test_between() {
        let (sql, params) = Q::between("price", 10, 100).build();
        assert_eq!(sql, "price BETWEEN ? AND ?");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_is_null() {
        let (sql, params) = Q::is_null("deleted_at").build();
        assert_eq!(sql, "deleted_at IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn field_names_walk_the_tree() {
        let q = Q::eq("a", 1).and(Q::is_null("b").or(Q::like("c", "%x").not()));
        assert_eq!(q.clone().into_expr().field_names(), vec!["a", "b", "c"]);
        assert!(q.validate().is_ok());
    }

    #[test]
    fn validate_rejects_injected_fields() {
        let q = Q::eq("status", "ok").and(Q::eq("1=1; DROP TABLE users", 1));
        assert!(q.validate().is_err());
        assert!(Q::eq("id -- comment", 1).validate().is_err());
    }
}
