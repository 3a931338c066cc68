use crate::error::Result;
use crate::types::ResultSet;

mod sealed {
    pub trait Sealed {}
}

/// Types a textual cell can be decoded into.
///
/// Implemented for `String`, the integer primitives and `f32`/`f64` only.
/// The trait is sealed, so asking for any other type is a compile error.
pub trait FromCell: sealed::Sealed + Sized {
    /// Name used in decode errors.
    const TYPE_NAME: &'static str;

    /// Value returned for SQL NULL and for an absent result set.
    fn zero() -> Self;

    /// Decodes the full text of a non-null cell, `None` if it doesn't fit.
    fn from_text(text: &str) -> Option<Self>;
}

impl sealed::Sealed for String {}

impl FromCell for String {
    const TYPE_NAME: &'static str = "String";

    fn zero() -> Self {
        String::new()
    }

    fn from_text(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

macro_rules! impl_from_cell_parse {
    ($zero:literal: $($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}

            impl FromCell for $t {
                const TYPE_NAME: &'static str = stringify!($t);

                fn zero() -> Self {
                    $zero
                }

                fn from_text(text: &str) -> Option<Self> {
                    text.parse().ok()
                }
            }
        )*
    };
}

impl_from_cell_parse!(0: i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
impl_from_cell_parse!(0.0: f32, f64);

/// Locates a column either by position or by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnLocator<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for ColumnLocator<'_> {
    fn from(index: usize) -> Self {
        ColumnLocator::Index(index)
    }
}

impl<'a> From<&'a str> for ColumnLocator<'a> {
    fn from(name: &'a str) -> Self {
        ColumnLocator::Name(name)
    }
}

impl<'a> From<&'a String> for ColumnLocator<'a> {
    fn from(name: &'a String) -> Self {
        ColumnLocator::Name(name)
    }
}

/// Extracts a typed value from a possibly absent result set.
///
/// An absent result set (the query failed or matched nothing) yields the
/// type's zero value for every row and column; otherwise this is
/// [`ResultSet::get`].
pub fn value<'a, T: FromCell>(
    answer: Option<&ResultSet>,
    row: usize,
    column: impl Into<ColumnLocator<'a>>,
) -> Result<T> {
    match answer {
        None => Ok(T::zero()),
        Some(result) => result.get(row, column),
    }
}

/// [`value`] on the first row.
pub fn value_at_first_row<'a, T: FromCell>(
    answer: Option<&ResultSet>,
    column: impl Into<ColumnLocator<'a>>,
) -> Result<T> {
    value(answer, 0, column)
}
