//! Field types that map onto a single column.

use std::any::type_name;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tether_core::{Key, KeyError, SqlValue, ToKey, ToSqlValue};

/// A Rust type stored in exactly one column.
///
/// Implemented for integers of every width, `bool`, floats, `String`,
/// byte buffers, fixed-size byte arrays, [`uuid::Uuid`], chrono date/time
/// types and `Option<T>` of any of these.
pub trait ColumnType: Send + Sync + Sized + 'static {
    /// Converts the field value into a bindable parameter.
    fn to_sql(&self) -> SqlValue;

    /// Reads the field value back from a row value.
    ///
    /// # Errors
    ///
    /// Returns a message when the value cannot represent `Self`.
    fn from_sql(value: SqlValue) -> Result<Self, String>;

    /// Key representation when the field joins a relation.
    ///
    /// # Errors
    ///
    /// Types that cannot act as keys return [`KeyError::Unsupported`].
    fn to_key(&self) -> Result<Key, KeyError> {
        Err(KeyError::Unsupported(type_name::<Self>()))
    }

    /// Whether the value is the zero value of its type.
    fn is_zero(&self) -> bool;
}

fn mismatch<T>(value: &SqlValue) -> String {
    format!("cannot read {} value into `{}`", value.kind(), type_name::<T>())
}

fn decode_int<T>(value: SqlValue) -> Result<T, String>
where
    T: TryFrom<i64> + FromStr,
{
    match value {
        SqlValue::Int(n) => T::try_from(n).map_err(|_| format!("{n} is out of range for `{}`", type_name::<T>())),
        SqlValue::Bool(b) => T::try_from(i64::from(b)).map_err(|_| mismatch::<T>(&SqlValue::Bool(b))),
        SqlValue::Text(ref s) => s.parse().map_err(|_| mismatch::<T>(&value)),
        other => Err(mismatch::<T>(&other)),
    }
}

macro_rules! integer_column {
    ($($ty:ty),*) => {
        $(
            impl ColumnType for $ty {
                fn to_sql(&self) -> SqlValue {
                    (*self).to_sql_value()
                }

                fn from_sql(value: SqlValue) -> Result<Self, String> {
                    decode_int(value)
                }

                fn to_key(&self) -> Result<Key, KeyError> {
                    Ok(ToKey::to_key(self))
                }

                fn is_zero(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

integer_column!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl ColumnType for bool {
    fn to_sql(&self) -> SqlValue {
        SqlValue::Bool(*self)
    }

    fn from_sql(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Bool(b) => Ok(b),
            SqlValue::Int(n) => Ok(n != 0),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn is_zero(&self) -> bool {
        !*self
    }
}

impl ColumnType for f64 {
    fn to_sql(&self) -> SqlValue {
        SqlValue::Float(*self)
    }

    #[allow(clippy::cast_precision_loss)]
    fn from_sql(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Float(f) => Ok(f),
            SqlValue::Int(n) => Ok(n as Self),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl ColumnType for f32 {
    fn to_sql(&self) -> SqlValue {
        SqlValue::Float(f64::from(*self))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn from_sql(value: SqlValue) -> Result<Self, String> {
        f64::from_sql(value).map(|f| f as Self)
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl ColumnType for String {
    fn to_sql(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }

    fn from_sql(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(s) => Ok(s),
            SqlValue::Int(n) => Ok(n.to_string()),
            SqlValue::Float(f) => Ok(f.to_string()),
            SqlValue::Blob(b) => Self::from_utf8(b).map_err(|e| e.to_string()),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn to_key(&self) -> Result<Key, KeyError> {
        Ok(ToKey::to_key(self))
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl ColumnType for Vec<u8> {
    fn to_sql(&self) -> SqlValue {
        SqlValue::Blob(self.clone())
    }

    fn from_sql(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Blob(b) => Ok(b),
            SqlValue::Text(s) => Ok(s.into_bytes()),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn to_key(&self) -> Result<Key, KeyError> {
        Ok(ToKey::to_key(self))
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<const N: usize> ColumnType for [u8; N] {
    fn to_sql(&self) -> SqlValue {
        SqlValue::Blob(self.to_vec())
    }

    fn from_sql(value: SqlValue) -> Result<Self, String> {
        let bytes = Vec::<u8>::from_sql(value)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| format!("expected {N} bytes, found {len}"))
    }

    fn to_key(&self) -> Result<Key, KeyError> {
        Ok(ToKey::to_key(self))
    }

    fn is_zero(&self) -> bool {
        ToKey::is_zero(self)
    }
}

impl ColumnType for uuid::Uuid {
    fn to_sql(&self) -> SqlValue {
        (*self).to_sql_value()
    }

    fn from_sql(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(s) => Self::parse_str(&s).map_err(|e| e.to_string()),
            SqlValue::Blob(b) => Self::from_slice(&b).map_err(|e| e.to_string()),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn to_key(&self) -> Result<Key, KeyError> {
        Ok(ToKey::to_key(self))
    }

    fn is_zero(&self) -> bool {
        self.is_nil()
    }
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn parse_naive_datetime(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|e| format!("invalid datetime `{s}`: {e}"))
}

impl ColumnType for DateTime<Utc> {
    fn to_sql(&self) -> SqlValue {
        SqlValue::Text(self.to_rfc3339())
    }

    fn from_sql(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| parse_naive_datetime(&s).map(|naive| naive.and_utc())),
            SqlValue::Int(secs) => {
                Self::from_timestamp(secs, 0).ok_or_else(|| format!("timestamp {secs} is out of range"))
            }
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn is_zero(&self) -> bool {
        self.timestamp() == 0 && self.timestamp_subsec_nanos() == 0
    }
}

impl ColumnType for NaiveDateTime {
    fn to_sql(&self) -> SqlValue {
        SqlValue::Text(self.format(DATETIME_FORMAT).to_string())
    }

    fn from_sql(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(s) => parse_naive_datetime(&s),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl ColumnType for NaiveDate {
    fn to_sql(&self) -> SqlValue {
        SqlValue::Text(self.format("%Y-%m-%d").to_string())
    }

    fn from_sql(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(s) => Self::parse_from_str(&s, "%Y-%m-%d").map_err(|e| e.to_string()),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl<T: ColumnType> ColumnType for Option<T> {
    fn to_sql(&self) -> SqlValue {
        self.as_ref().map_or(SqlValue::Null, ColumnType::to_sql)
    }

    fn from_sql(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql(other).map(Some),
        }
    }

    fn to_key(&self) -> Result<Key, KeyError> {
        self.as_ref().map_or(Ok(Key::Null), ColumnType::to_key)
    }

    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_trip_through_rows() {
        assert_eq!(u8::from_sql(SqlValue::Int(200)), Ok(200));
        assert!(u8::from_sql(SqlValue::Int(300)).is_err());
        assert_eq!(u64::from_sql(SqlValue::Text(String::from("18446744073709551615"))), Ok(u64::MAX));
        assert!(i64::from_sql(SqlValue::Null).is_err());
    }

    #[test]
    fn keys_follow_the_encoder() {
        assert_eq!(ColumnType::to_key(&5_u16).unwrap().encode(), "5");
        assert_eq!(ColumnType::to_key(&String::from("x")).unwrap().encode(), "x");
        assert_eq!(ColumnType::to_key(&None::<i64>).unwrap(), Key::Null);
        assert!(matches!(ColumnType::to_key(&1.5_f64), Err(KeyError::Unsupported("f64"))));
        assert!(ColumnType::to_key(&true).is_err());
    }

    #[test]
    fn fixed_arrays_check_length() {
        assert_eq!(<[u8; 2]>::from_sql(SqlValue::Blob(vec![1, 2])), Ok([1, 2]));
        assert!(<[u8; 2]>::from_sql(SqlValue::Blob(vec![1])).is_err());
    }

    #[test]
    fn optional_null_is_none() {
        assert_eq!(Option::<String>::from_sql(SqlValue::Null), Ok(None));
        assert_eq!(Some(3_i32).to_sql(), SqlValue::Int(3));
        assert!(ColumnType::is_zero(&None::<i32>));
    }

    #[test]
    fn datetimes_accept_sqlite_text() {
        let dt = DateTime::<Utc>::from_sql(SqlValue::Text(String::from("2024-01-02 03:04:05"))).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        let back = DateTime::<Utc>::from_sql(dt.to_sql()).unwrap();
        assert_eq!(back, dt);
    }
}
