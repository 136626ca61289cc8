//! The type lattice of the compilable subset.
//!
//! Every value a compiled function touches has exactly one of these types:
//! `bool`, `None`, or a signed integer of 32 or 64 bits. The lattice is
//! deliberately tiny and closed: two integer types merge by promoting to the
//! wider width, every other pair of distinct types has no least upper bound
//! and refuses to merge. That refusal is what the inference engine reports
//! as a type conflict.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bit width of a signed integer, ordered by promotion rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntWidth {
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(&self) -> u32 {
        match self {
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

/// A type in the statically inferable subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PyType {
    /// The two-valued truth type
    Bool,
    /// The unit type of `None`
    None,
    /// Signed integer of the given width
    Int(IntWidth),
}

impl PyType {
    pub const INT32: PyType = PyType::Int(IntWidth::W32);
    pub const INT64: PyType = PyType::Int(IntWidth::W64);

    pub fn is_int(&self) -> bool {
        matches!(self, PyType::Int(_))
    }

    pub fn int_width(&self) -> Option<IntWidth> {
        match self {
            PyType::Int(w) => Some(*w),
            _ => None,
        }
    }
}

impl fmt::Display for PyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyType::Bool => write!(f, "bool"),
            PyType::None => write!(f, "None"),
            PyType::Int(w) => write!(f, "int{}", w.bits()),
        }
    }
}

/// A pair of types with no least upper bound.
///
/// Produced by [`merge`]; callers wrap it with the source span and the
/// context in which the merge was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeConflict {
    pub left: PyType,
    pub right: PyType,
}

/// Least upper bound of two types.
///
/// Identical types merge to themselves, two integers merge to the wider
/// width, and any other combination is a conflict.
pub fn merge(left: PyType, right: PyType) -> Result<PyType, TypeConflict> {
    match (left, right) {
        (PyType::Int(a), PyType::Int(b)) => Ok(PyType::Int(a.max(b))),
        (a, b) if a == b => Ok(a),
        (left, right) => Err(TypeConflict { left, right }),
    }
}

/// Type of an integer literal: the narrowest width that holds its value.
pub fn int_literal_type(value: i64) -> PyType {
    if i32::try_from(value).is_ok() {
        PyType::INT32
    } else {
        PyType::INT64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_identical_types() {
        assert_eq!(merge(PyType::Bool, PyType::Bool), Ok(PyType::Bool));
        assert_eq!(merge(PyType::None, PyType::None), Ok(PyType::None));
        assert_eq!(merge(PyType::INT32, PyType::INT32), Ok(PyType::INT32));
    }

    #[test]
    fn test_merge_promotes_integer_width() {
        assert_eq!(merge(PyType::INT32, PyType::INT64), Ok(PyType::INT64));
        assert_eq!(merge(PyType::INT64, PyType::INT32), Ok(PyType::INT64));
        assert_eq!(merge(PyType::INT64, PyType::INT64), Ok(PyType::INT64));
    }

    #[test]
    fn test_merge_rejects_unrelated_types() {
        let conflict = merge(PyType::Bool, PyType::INT32);
        assert_eq!(
            conflict,
            Err(TypeConflict {
                left: PyType::Bool,
                right: PyType::INT32,
            })
        );
        assert!(merge(PyType::None, PyType::INT64).is_err());
        assert!(merge(PyType::Bool, PyType::None).is_err());
    }

    #[test]
    fn test_int_literal_width_boundaries() {
        assert_eq!(int_literal_type(0), PyType::INT32);
        assert_eq!(int_literal_type(i64::from(i32::MAX)), PyType::INT32);
        assert_eq!(int_literal_type(i64::from(i32::MIN)), PyType::INT32);
        assert_eq!(int_literal_type(i64::from(i32::MAX) + 1), PyType::INT64);
        assert_eq!(int_literal_type(i64::from(i32::MIN) - 1), PyType::INT64);
        assert_eq!(int_literal_type(5_000_000_000), PyType::INT64);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(PyType::Bool.to_string(), "bool");
        assert_eq!(PyType::None.to_string(), "None");
        assert_eq!(PyType::INT32.to_string(), "int32");
        assert_eq!(PyType::INT64.to_string(), "int64");
    }
}
