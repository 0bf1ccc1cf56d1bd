//! Zero-value-safe optional handling.
//!
//! Upstream query parameters treat the zero value of a type as "unset". These
//! helpers convert between zero values and `Option` so callers never emit an
//! empty filter or a `0` page size by accident.

/// Types with a distinguished zero value.
pub trait Zero {
    fn is_zero(&self) -> bool;
}

impl Zero for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl Zero for &str {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl Zero for i64 {
    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl Zero for u64 {
    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl Zero for usize {
    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl Zero for f64 {
    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl Zero for bool {
    fn is_zero(&self) -> bool {
        !*self
    }
}

impl<T> Zero for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

/// `None` for the zero value, `Some(value)` otherwise.
pub fn non_zero<T: Zero>(value: T) -> Option<T> {
    if value.is_zero() {
        None
    } else {
        Some(value)
    }
}

/// The referenced value, or the type's default when absent.
pub fn value_or_default<T: Default + Clone>(value: Option<&T>) -> T {
    value.cloned().unwrap_or_default()
}

/// Returns `fallback` when `value` is the zero value.
pub fn or_else<T: Zero>(value: T, fallback: T) -> T {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}
