//! Query building: filters and statement scopes.

mod filter;
mod scope;

pub use filter::{CompareOp, FilterExpr, Q};
pub use scope::{OrderBy, OrderDirection, Scope};
