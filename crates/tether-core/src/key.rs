//! Canonical encoding of relation keys.
//!
//! Parents and children are correlated in memory by comparing encoded keys, so
//! both sides of a join must encode the same logical value to the same string
//! whatever integer width, text or byte representation they are declared with.
//!
//! Encoding rules:
//!
//! - `NULL` encodes to the empty string.
//! - Integers of any width and signedness encode to base-10 text with sign.
//! - Byte sequences encode as their bytes read as text (not hex). Invalid UTF-8
//!   is replaced lossily, so two byte strings differing only in invalid
//!   sequences can collide.
//! - Identifier types (UUIDs and other types with a canonical text form)
//!   encode to that text form.
//!
//! There is no catch-all formatting: a value that is none of the above is
//! rejected with [`KeyError::Unsupported`].

use std::fmt;

use thiserror::Error;

use crate::value::SqlValue;

/// A relation key in one of the supported representations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Absent key.
    Null,
    /// Signed integer of any width.
    Signed(i128),
    /// Unsigned integer of any width.
    Unsigned(u128),
    /// Text key.
    Text(String),
    /// Raw bytes, compared as text.
    Bytes(Vec<u8>),
    /// Opaque identifier rendered through its canonical text form.
    Ident(String),
}

/// Errors raised when a value cannot act as a relation key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The value's type has no key representation.
    #[error("values of type `{0}` cannot be used as relation keys")]
    Unsupported(&'static str),
}

impl Key {
    /// Returns the canonical string form used for in-memory correlation.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Signed(n) => n.to_string(),
            Self::Unsigned(n) => n.to_string(),
            Self::Text(s) | Self::Ident(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Reports whether this key is the zero value of its representation.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Signed(n) => *n == 0,
            Self::Unsigned(n) => *n == 0,
            Self::Text(s) | Self::Ident(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl TryFrom<&SqlValue> for Key {
    type Error = KeyError;

    fn try_from(value: &SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Null => Ok(Self::Null),
            SqlValue::Int(n) => Ok(Self::Signed(i128::from(*n))),
            SqlValue::Text(s) => Ok(Self::Text(s.clone())),
            SqlValue::Blob(b) => Ok(Self::Bytes(b.clone())),
            SqlValue::Bool(_) => Err(KeyError::Unsupported("bool")),
            SqlValue::Float(_) => Err(KeyError::Unsupported("f64")),
        }
    }
}

/// Types that can serve as relation keys.
pub trait ToKey {
    /// Converts the value into its key representation.
    fn to_key(&self) -> Key;

    /// Reports whether the value is the zero value of its type.
    fn is_zero(&self) -> bool {
        self.to_key().is_zero()
    }
}

macro_rules! signed_key {
    ($($ty:ty),*) => {
        $(
            impl ToKey for $ty {
                fn to_key(&self) -> Key {
                    Key::Signed(i128::from(*self))
                }

                fn is_zero(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

macro_rules! unsigned_key {
    ($($ty:ty),*) => {
        $(
            impl ToKey for $ty {
                fn to_key(&self) -> Key {
                    Key::Unsigned(u128::from(*self))
                }

                fn is_zero(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

signed_key!(i8, i16, i32, i64, i128);
unsigned_key!(u8, u16, u32, u64, u128);

impl ToKey for isize {
    fn to_key(&self) -> Key {
        // isize is at most 64 bits on every supported target
        Key::Signed(*self as i128)
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl ToKey for usize {
    fn to_key(&self) -> Key {
        Key::Unsigned(*self as u128)
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl ToKey for str {
    fn to_key(&self) -> Key {
        Key::Text(self.to_owned())
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl ToKey for String {
    fn to_key(&self) -> Key {
        Key::Text(self.clone())
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl ToKey for [u8] {
    fn to_key(&self) -> Key {
        Key::Bytes(self.to_vec())
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl ToKey for Vec<u8> {
    fn to_key(&self) -> Key {
        Key::Bytes(self.clone())
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<const N: usize> ToKey for [u8; N] {
    fn to_key(&self) -> Key {
        Key::Bytes(self.to_vec())
    }

    fn is_zero(&self) -> bool {
        self.iter().all(|b| *b == 0)
    }
}

impl<T: ToKey> ToKey for Option<T> {
    fn to_key(&self) -> Key {
        self.as_ref().map_or(Key::Null, ToKey::to_key)
    }

    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

impl<T: ToKey + ?Sized> ToKey for &T {
    fn to_key(&self) -> Key {
        (**self).to_key()
    }

    fn is_zero(&self) -> bool {
        (**self).is_zero()
    }
}

#[cfg(feature = "uuid")]
impl ToKey for uuid::Uuid {
    fn to_key(&self) -> Key {
        Key::Ident(self.hyphenated().to_string())
    }

    fn is_zero(&self) -> bool {
        self.is_nil()
    }
}

/// Encodes any key-capable value to its canonical string.
pub fn encode_key<K: ToKey + ?Sized>(value: &K) -> String {
    value.to_key().encode()
}

/// Reports whether a key-capable value is the zero value of its type.
pub fn is_zero<K: ToKey + ?Sized>(value: &K) -> bool {
    value.is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_encode_identically_across_widths() {
        assert_eq!(encode_key(&7_i8), "7");
        assert_eq!(encode_key(&7_u16), "7");
        assert_eq!(encode_key(&7_i64), encode_key(&7_u64));
        assert_eq!(encode_key(&-42_i32), "-42");
        assert_eq!(encode_key(&u128::MAX), u128::MAX.to_string());
    }

    #[test]
    fn encoding_is_deterministic() {
        for n in [0_i64, 1, -1, i64::MAX, i64::MIN] {
            assert_eq!(encode_key(&n), encode_key(&n));
        }
        let s = String::from("abc");
        assert_eq!(encode_key(&s), encode_key(&s.clone()));
    }

    #[test]
    fn distinct_values_encode_distinctly() {
        let encoded: std::collections::HashSet<String> =
            (-500_i64..500).map(|n| encode_key(&n)).collect();
        assert_eq!(encoded.len(), 1000);

        let strings: std::collections::HashSet<String> =
            ["a", "b", "ab", "ba", ""].iter().map(|s| encode_key(*s)).collect();
        assert_eq!(strings.len(), 5);
    }

    #[test]
    fn bytes_encode_as_text() {
        assert_eq!(encode_key(&b"user-1".to_vec()), "user-1");
        assert_eq!(encode_key(b"ab"), "ab");
        assert_eq!(encode_key(&b"user-1"[..]), encode_key("user-1"));
    }

    #[test]
    fn option_and_null() {
        assert_eq!(encode_key(&None::<i64>), "");
        assert_eq!(encode_key(&Some(5_i64)), "5");
        assert!(is_zero(&None::<i64>));
        assert!(!is_zero(&Some(0_i64)));
    }

    #[test]
    fn key_zero_check_is_const() {
        const NULL_IS_ZERO: bool = Key::Null.is_zero();
        const SIGNED_IS_ZERO: bool = Key::Signed(7).is_zero();
        assert!(NULL_IS_ZERO);
        assert!(!SIGNED_IS_ZERO);
    }

    #[test]
    fn zero_values() {
        assert!(is_zero(&0_u8));
        assert!(is_zero(""));
        assert!(is_zero(&Vec::<u8>::new()));
        assert!(is_zero(&[0_u8; 4]));
        assert!(!is_zero(&[0_u8, 1, 0, 0]));
        assert!(!is_zero(&-1_i16));
    }

    #[cfg(feature = "uuid")]
    #[test]
    fn uuid_uses_canonical_text() {
        let id = uuid::Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        assert_eq!(encode_key(&id), "01234567-89ab-cdef-0123-456789abcdef");
        assert!(is_zero(&uuid::Uuid::nil()));
    }

    #[test]
    fn sql_values_convert_to_matching_keys() {
        let key = Key::try_from(&SqlValue::Int(3)).unwrap();
        assert_eq!(key.encode(), encode_key(&3_u32));
        let key = Key::try_from(&SqlValue::Text(String::from("x"))).unwrap();
        assert_eq!(key.encode(), "x");
        assert!(matches!(
            Key::try_from(&SqlValue::Float(1.5)),
            Err(KeyError::Unsupported(_))
        ));
    }
}
