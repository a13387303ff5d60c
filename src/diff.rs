//! Field-level diff helpers for catalog authors.
//!
//! Resource kinds model optional state as `Option<T>` fields and implement
//! [`Resource::diff`](crate::Resource::diff) explicitly, one field at a
//! time. These helpers keep those impls short and uniform: a field appears
//! in `changes` exactly when the desired value is set and differs from the
//! actual one.

use crate::task::Resource;

/// The computed (actual, expected, changes) triple for one task in one run.
///
/// Owned exclusively by the converging task; sibling tasks never share one.
#[derive(Debug, Clone)]
pub struct ChangeSet<R: Resource> {
    pub actual: Option<R>,
    pub expected: R,
    pub changes: R,
}

impl<R: Resource> ChangeSet<R> {
    pub fn new(actual: Option<R>, expected: R) -> Self {
        let changes = match &actual {
            Some(actual) => expected.diff(actual),
            None => expected.clone(),
        };
        Self {
            actual,
            expected,
            changes,
        }
    }

    /// True when no change is requested for any field.
    pub fn is_empty(&self) -> bool {
        self.actual.is_some() && R::is_empty(&self.changes)
    }
}

/// Diff a single optional field: expected minus actual.
///
/// Returns the desired value when it is set and the actual value differs,
/// `None` otherwise. An unset desired value never requests a change.
pub fn field<T: Clone + PartialEq>(actual: Option<&T>, expected: Option<&T>) -> Option<T> {
    match (actual, expected) {
        (_, None) => None,
        (None, Some(e)) => Some(e.clone()),
        (Some(a), Some(e)) => (a != e).then(|| e.clone()),
    }
}

/// Dereference an optional field, falling back to the type's default.
pub fn value<T: Clone + Default>(field: Option<&T>) -> T {
    field.cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_expected_requests_nothing() {
        assert_eq!(field::<String>(Some(&"a".into()), None), None);
        assert_eq!(field::<String>(None, None), None);
    }

    #[test]
    fn absent_actual_takes_expected() {
        assert_eq!(field(None, Some(&7)), Some(7));
    }

    #[test]
    fn equal_values_are_not_a_change() {
        assert_eq!(field(Some(&7), Some(&7)), None);
        assert_eq!(field(Some(&7), Some(&8)), Some(8));
    }

    #[test]
    fn value_defaults_when_unset() {
        assert_eq!(value::<u32>(None), 0);
        assert_eq!(value(Some(&5u32)), 5);
    }
}
