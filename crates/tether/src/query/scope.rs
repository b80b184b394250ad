//! Statement scope: filters, ordering and paging shared by query sets and
//! eager-load constraints.

use std::fmt::Write as _;

use tether_core::{validate_identifier, IdentifierError, SqlValue};

use super::filter::{FilterExpr, Q};

/// Order direction for sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (ASC)
    Asc,
    /// Descending order (DESC)
    Desc,
}

/// An ordering specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column to order by
    pub column: String,
    /// Order direction
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Creates a new ascending order specification.
    #[must_use]
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: OrderDirection::Asc,
        }
    }

    /// Creates a new descending order specification.
    #[must_use]
    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: OrderDirection::Desc,
        }
    }

    /// Parses `"-created_at"` as descending and `"name"` as ascending.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        spec.strip_prefix('-')
            .map_or_else(|| Self::asc(spec), Self::desc)
    }

    /// Returns the SQL representation.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self.direction {
            OrderDirection::Asc => format!("{} ASC", self.column),
            OrderDirection::Desc => format!("{} DESC", self.column),
        }
    }
}

/// Conditions and paging of one select, independent of its table.
///
/// Eager-load constraint callbacks receive the scope of the batch query,
/// already holding the join condition, and return it refined:
///
/// ```
/// use tether::{Q, Scope};
///
/// let scope = Scope::new()
///     .filter(Q::in_list("post_id", vec![1, 2]))
///     .filter(Q::eq("approved", true))
///     .order_by("-id");
/// let (sql, params) = scope.build_select("comments", &["id".to_string(), "body".to_string()]);
/// assert_eq!(
///     sql,
///     "SELECT id, body FROM comments WHERE post_id IN (?, ?) AND approved = ? ORDER BY id DESC"
/// );
/// assert_eq!(params.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Scope {
    filters: Vec<FilterExpr>,
    excludes: Vec<FilterExpr>,
    order_by: Vec<OrderBy>,
    limit: Option<i64>,
    offset: Option<i64>,
    distinct: bool,
}

impl Scope {
    /// An unrestricted scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter; filters are combined with AND.
    #[must_use]
    pub fn filter(mut self, q: Q) -> Self {
        self.filters.push(q.into_expr());
        self
    }

    /// Excludes rows matching `q`.
    #[must_use]
    pub fn exclude(mut self, q: Q) -> Self {
        self.excludes.push(q.into_expr());
        self
    }

    /// Appends an ordering; prefix with `-` for descending.
    #[must_use]
    pub fn order_by(mut self, spec: &str) -> Self {
        self.order_by.push(OrderBy::parse(spec));
        self
    }

    /// Replaces all ordering.
    #[must_use]
    pub fn order_by_clear(mut self, specs: &[&str]) -> Self {
        self.order_by = specs.iter().map(|s| OrderBy::parse(s)).collect();
        self
    }

    /// Limits the number of rows.
    #[must_use]
    pub const fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skips the first `n` rows.
    #[must_use]
    pub const fn offset(mut self, n: i64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Selects distinct rows.
    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Current limit.
    #[must_use]
    pub const fn limit_value(&self) -> Option<i64> {
        self.limit
    }

    /// Checks every identifier the scope will interpolate.
    ///
    /// # Errors
    ///
    /// Returns the first identifier rejected by the whitelist.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        for expr in self.filters.iter().chain(&self.excludes) {
            expr.validate()?;
        }
        for order in &self.order_by {
            validate_identifier(&order.column)?;
        }
        Ok(())
    }

    /// Builds `SELECT columns FROM table ...` and its parameters.
    #[must_use]
    pub fn build_select(&self, table: &str, columns: &[String]) -> (String, Vec<SqlValue>) {
        let mut params = Vec::new();
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(table);

        let where_clause = self.build_where_clause(&mut params);
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let order_parts: Vec<String> = self.order_by.iter().map(OrderBy::to_sql).collect();
            sql.push_str(&order_parts.join(", "));
        }

        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        if let Some(offset) = self.offset {
            if self.limit.is_none() {
                sql.push_str(" LIMIT -1");
            }
            let _ = write!(sql, " OFFSET {offset}");
        }

        (sql, params)
    }

    /// Builds `SELECT COUNT(*) FROM table ...` and its parameters.
    #[must_use]
    pub fn build_count(&self, table: &str) -> (String, Vec<SqlValue>) {
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(*) FROM {table}");
        let where_clause = self.build_where_clause(&mut params);
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }
        (sql, params)
    }

    fn build_where_clause(&self, params: &mut Vec<SqlValue>) -> String {
        let mut conditions = Vec::new();

        for filter in &self.filters {
            let (sql, filter_params) = filter.build();
            conditions.push(sql);
            params.extend(filter_params);
        }

        for exclude in &self.excludes {
            let (sql, exclude_params) = exclude.build();
            conditions.push(format!("NOT ({sql})"));
            params.extend(exclude_params);
        }

        conditions.join(" AND ")
    }
}
