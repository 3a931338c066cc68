use std::borrow::Cow;
use std::fmt;

/// Represents a SQL parameter value in a driver-agnostic way.
///
/// The set of variants is closed: only text, integral and floating-point
/// values can be bound. There is no `From` impl for anything else, so
/// passing e.g. a `bool` to [`params!`](crate::params) does not compile.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl SqlValue {
    /// Renders the value the way it is sent on the wire.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Signed(i) => write!(f, "{}", i),
            SqlValue::Unsigned(u) => write!(f, "{}", u),
            SqlValue::Float(x) => write!(f, "{}", x),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl From<Cow<'_, str>> for SqlValue {
    fn from(value: Cow<'_, str>) -> Self {
        SqlValue::Text(value.into_owned())
    }
}

macro_rules! impl_from_int {
    ($variant:ident as $wide:ty: $($t:ty),*) => {
        $(
            impl From<$t> for SqlValue {
                fn from(value: $t) -> Self {
                    SqlValue::$variant(value as $wide)
                }
            }
        )*
    };
}

impl_from_int!(Signed as i64: i8, i16, i32, i64, isize);
impl_from_int!(Unsigned as u64: u8, u16, u32, u64, usize);

impl From<f32> for SqlValue {
    fn from(value: f32) -> Self {
        // Through the shortest f32 rendering so 0.1f32 binds as "0.1".
        SqlValue::Float(value.to_string().parse().unwrap_or(value as f64))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

/// Builds a `[SqlValue; N]` from a list of bindable expressions.
///
/// ```
/// use pgdal::{params, SqlValue};
///
/// let p = params!["TestUser0", 42u64, -1i32, 0.5];
/// assert_eq!(p[1], SqlValue::Unsigned(42));
/// ```
#[macro_export]
macro_rules! params {
    () => {
        {
            let empty: [$crate::SqlValue; 0] = [];
            empty
        }
    };
    ($($value:expr),+ $(,)?) => {
        [$($crate::SqlValue::from($value)),+]
    };
}

/// Owned textual renderings of a parameter list, in call order.
///
/// Drivers borrow the strings for the duration of one execute call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundParams {
    values: Vec<String>,
}

impl BoundParams {
    pub fn bind(params: &[SqlValue]) -> Self {
        Self {
            values: params.iter().map(SqlValue::to_text).collect(),
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }
}
