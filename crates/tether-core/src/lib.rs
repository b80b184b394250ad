//! # tether-core
//!
//! The value layer underneath `tether`:
//!
//! - [`SqlValue`] / [`ToSqlValue`]: parameters bound into generated SQL and
//!   values read back from rows
//! - [`Key`] / [`ToKey`]: canonical encoding of relation keys so parents and
//!   children can be correlated in memory regardless of their declared types
//! - [`validate_identifier`]: the whitelist applied to every table and column
//!   name interpolated into SQL
//!
//! ## Key Encoding
//!
//! ```rust
//! use tether_core::{encode_key, is_zero};
//!
//! // Integer widths do not matter, only the value does.
//! assert_eq!(encode_key(&42_i32), encode_key(&42_u64));
//!
//! // Bytes are compared as text.
//! assert_eq!(encode_key(&b"abc".to_vec()), encode_key("abc"));
//!
//! // Absent optional keys are zero and never queried.
//! assert!(is_zero(&None::<i64>));
//! ```
//!
//! ## SQL Injection Prevention
//!
//! ```rust
//! use tether_core::validate_identifier;
//!
//! assert!(validate_identifier("author_id").is_ok());
//! assert!(validate_identifier("author_id; DROP TABLE authors; --").is_err());
//! ```

pub mod ident;
pub mod key;
pub mod value;

pub use ident::{validate_identifier, validate_identifiers, IdentifierError};
pub use key::{encode_key, is_zero, Key, KeyError, ToKey};
pub use value::{SqlValue, ToSqlValue};
