//! Retain / insert / delete operations over a linear text buffer.
//!
//! An operation always covers the entire input document: the sum of its
//! retains and deletes is the `base_len` it can be applied to, and the sum
//! of its retains and inserts is the `target_len` it produces.
//!
//! ```text
//!  base:   h e l l o _ w o r l d
//!          └ retain 5 ┘└ del 6 ┘
//!  target: h e l l o ! ! !
//!                    └insert "!!!"
//! ```
//!
//! The builder methods keep operations in canonical form: adjacent
//! components of the same kind are merged, and an insert that directly
//! follows a delete is moved in front of it. Two operations that do the same
//! thing therefore compare equal.

use thiserror::Error;

/// Errors raised when operations do not line up with each other or with
/// the text they are applied to.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("operation expects a document of {expected} chars, got {actual}")]
    BaseLengthMismatch { expected: usize, actual: usize },

    #[error("cannot compose: first operation produces {first_target} chars, second expects {second_base}")]
    ComposeMismatch { first_target: usize, second_base: usize },

    #[error("cannot transform operations with different base lengths ({left} vs {right})")]
    TransformMismatch { left: usize, right: usize },

    #[error("invalid operation component: {0}")]
    InvalidComponent(String),

    #[error("operation transport error: {0}")]
    Transport(#[from] serde_json::Error),
}

/// A single step of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    /// Keep the next `n` chars unchanged.
    Retain(usize),
    /// Insert text at the current position.
    Insert(String),
    /// Remove the next `n` chars.
    Delete(usize),
}

/// An edit to a text document, in canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextOperation {
    components: Vec<Component>,
    base_len: usize,
    target_len: usize,
}

impl TextOperation {
    /// Empty operation over an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Operation that produces `text` from an empty document.
    ///
    /// This is the representation used for whole-document snapshots.
    pub fn from_text(text: &str) -> Self {
        let mut op = Self::new();
        op.insert(text);
        op
    }

    /// Append a retain of `n` chars.
    pub fn retain(&mut self, n: usize) -> &mut Self {
        if n == 0 {
            return self;
        }
        self.base_len += n;
        self.target_len += n;
        if let Some(Component::Retain(last)) = self.components.last_mut() {
            *last += n;
        } else {
            self.components.push(Component::Retain(n));
        }
        self
    }

    /// Append an insert of `text`.
    pub fn insert(&mut self, text: &str) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        self.target_len += text.chars().count();

        let len = self.components.len();
        match self.components.last_mut() {
            Some(Component::Insert(last)) => {
                last.push_str(text);
            }
            Some(Component::Delete(_)) => {
                // Insert-before-delete keeps the form canonical.
                if len >= 2 {
                    if let Component::Insert(prev) = &mut self.components[len - 2] {
                        prev.push_str(text);
                        return self;
                    }
                }
                self.components.insert(len - 1, Component::Insert(text.to_string()));
            }
            _ => self.components.push(Component::Insert(text.to_string())),
        }
        self
    }

    /// Append a delete of `n` chars.
    pub fn delete(&mut self, n: usize) -> &mut Self {
        if n == 0 {
            return self;
        }
        self.base_len += n;
        if let Some(Component::Delete(last)) = self.components.last_mut() {
            *last += n;
        } else {
            self.components.push(Component::Delete(n));
        }
        self
    }

    /// Append an arbitrary component through the canonicalising builder.
    pub fn push(&mut self, component: Component) -> &mut Self {
        match component {
            Component::Retain(n) => self.retain(n),
            Component::Insert(text) => self.insert(&text),
            Component::Delete(n) => self.delete(n),
        }
    }

    /// Components in canonical order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Length (in chars) of the document this operation applies to.
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    /// Length (in chars) of the document this operation produces.
    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// True when applying the operation leaves any document unchanged.
    pub fn is_noop(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c, Component::Retain(_)))
    }

    /// For whole-document operations (inserts over an empty base), the text
    /// they produce.
    pub fn as_text(&self) -> Option<String> {
        if self.base_len != 0 {
            return None;
        }
        let mut text = String::with_capacity(self.target_len);
        for component in &self.components {
            if let Component::Insert(s) = component {
                text.push_str(s);
            }
        }
        Some(text)
    }

    /// Apply this operation to `text`.
    pub fn apply(&self, text: &str) -> Result<String, OperationError> {
        let actual = text.chars().count();
        if actual != self.base_len {
            return Err(OperationError::BaseLengthMismatch {
                expected: self.base_len,
                actual,
            });
        }

        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars();
        for component in &self.components {
            match component {
                Component::Retain(n) => out.extend(chars.by_ref().take(*n)),
                Component::Insert(s) => out.push_str(s),
                Component::Delete(n) => {
                    // Skip n chars.
                    chars.by_ref().take(*n).for_each(drop);
                }
            }
        }
        Ok(out)
    }

    /// Merge `self` followed by `next` into a single operation such that
    /// `apply(apply(s, self), next) == apply(s, self.compose(next))`.
    pub fn compose(&self, next: &TextOperation) -> Result<TextOperation, OperationError> {
        if self.target_len != next.base_len {
            return Err(OperationError::ComposeMismatch {
                first_target: self.target_len,
                second_base: next.base_len,
            });
        }

        let mut out = TextOperation::new();
        let mut left = self.components.iter().cloned();
        let mut right = next.components.iter().cloned();
        let mut a = left.next();
        let mut b = right.next();

        loop {
            match (a.take(), b.take()) {
                (None, None) => break,

                (Some(Component::Delete(n)), pending) => {
                    out.delete(n);
                    a = left.next();
                    b = pending;
                }
                (pending, Some(Component::Insert(s))) => {
                    out.insert(&s);
                    a = pending;
                    b = right.next();
                }

                (None, Some(_)) | (Some(_), None) => {
                    return Err(OperationError::ComposeMismatch {
                        first_target: self.target_len,
                        second_base: next.base_len,
                    });
                }

                (Some(Component::Retain(n)), Some(Component::Retain(m))) => {
                    let k = n.min(m);
                    out.retain(k);
                    a = if n > k { Some(Component::Retain(n - k)) } else { left.next() };
                    b = if m > k { Some(Component::Retain(m - k)) } else { right.next() };
                }

                (Some(Component::Insert(s)), Some(Component::Delete(m))) => {
                    let len = s.chars().count();
                    let k = len.min(m);
                    a = if len > k {
                        Some(Component::Insert(split_chars(&s, k).1.to_string()))
                    } else {
                        left.next()
                    };
                    b = if m > k { Some(Component::Delete(m - k)) } else { right.next() };
                }

                (Some(Component::Insert(s)), Some(Component::Retain(m))) => {
                    let len = s.chars().count();
                    let k = len.min(m);
                    let (head, tail) = split_chars(&s, k);
                    out.insert(head);
                    a = if len > k {
                        Some(Component::Insert(tail.to_string()))
                    } else {
                        left.next()
                    };
                    b = if m > k { Some(Component::Retain(m - k)) } else { right.next() };
                }

                (Some(Component::Retain(n)), Some(Component::Delete(m))) => {
                    let k = n.min(m);
                    out.delete(k);
                    a = if n > k { Some(Component::Retain(n - k)) } else { left.next() };
                    b = if m > k { Some(Component::Delete(m - k)) } else { right.next() };
                }
            }
        }

        Ok(out)
    }

    /// Transform two concurrent operations over the same base into
    /// `(a', b')` such that `apply(apply(s, a), b') == apply(apply(s, b), a')`.
    ///
    /// When both sides insert at the same position, `self`'s insert is
    /// placed first.
    pub fn transform(
        &self,
        other: &TextOperation,
    ) -> Result<(TextOperation, TextOperation), OperationError> {
        if self.base_len != other.base_len {
            return Err(OperationError::TransformMismatch {
                left: self.base_len,
                right: other.base_len,
            });
        }

        let mut a_prime = TextOperation::new();
        let mut b_prime = TextOperation::new();
        let mut left = self.components.iter().cloned();
        let mut right = other.components.iter().cloned();
        let mut a = left.next();
        let mut b = right.next();

        loop {
            match (a.take(), b.take()) {
                (None, None) => break,

                (Some(Component::Insert(s)), pending) => {
                    b_prime.retain(s.chars().count());
                    a_prime.insert(&s);
                    a = left.next();
                    b = pending;
                }
                (pending, Some(Component::Insert(s))) => {
                    a_prime.retain(s.chars().count());
                    b_prime.insert(&s);
                    a = pending;
                    b = right.next();
                }

                (None, Some(_)) | (Some(_), None) => {
                    return Err(OperationError::TransformMismatch {
                        left: self.base_len,
                        right: other.base_len,
                    });
                }

                (Some(Component::Retain(n)), Some(Component::Retain(m))) => {
                    let k = n.min(m);
                    a_prime.retain(k);
                    b_prime.retain(k);
                    a = if n > k { Some(Component::Retain(n - k)) } else { left.next() };
                    b = if m > k { Some(Component::Retain(m - k)) } else { right.next() };
                }

                (Some(Component::Delete(n)), Some(Component::Delete(m))) => {
                    // Both sides removed the same chars.
                    let k = n.min(m);
                    a = if n > k { Some(Component::Delete(n - k)) } else { left.next() };
                    b = if m > k { Some(Component::Delete(m - k)) } else { right.next() };
                }

                (Some(Component::Delete(n)), Some(Component::Retain(m))) => {
                    let k = n.min(m);
                    a_prime.delete(k);
                    a = if n > k { Some(Component::Delete(n - k)) } else { left.next() };
                    b = if m > k { Some(Component::Retain(m - k)) } else { right.next() };
                }

                (Some(Component::Retain(n)), Some(Component::Delete(m))) => {
                    let k = n.min(m);
                    b_prime.delete(k);
                    a = if n > k { Some(Component::Retain(n - k)) } else { left.next() };
                    b = if m > k { Some(Component::Delete(m - k)) } else { right.next() };
                }
            }
        }

        Ok((a_prime, b_prime))
    }
}

/// Split `s` after `n` chars.
fn split_chars(s: &str, n: usize) -> (&str, &str) {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn op(components: &[Component]) -> TextOperation {
        let mut op = TextOperation::new();
        for c in components {
            op.push(c.clone());
        }
        op
    }

    #[test]
    fn test_builder_merges_adjacent_components() {
        let mut op = TextOperation::new();
        op.retain(2).retain(3).insert("ab").insert("c").delete(1).delete(2);

        assert_eq!(
            op.components(),
            &[
                Component::Retain(5),
                Component::Insert("abc".into()),
                Component::Delete(3),
            ]
        );
        assert_eq!(op.base_len(), 8);
        assert_eq!(op.target_len(), 8);
    }

    #[test]
    fn test_insert_after_delete_is_reordered() {
        let mut a = TextOperation::new();
        a.retain(1).delete(2).insert("xy");

        let mut b = TextOperation::new();
        b.retain(1).insert("xy").delete(2);

        assert_eq!(a, b);
        assert_eq!(
            a.components(),
            &[
                Component::Retain(1),
                Component::Insert("xy".into()),
                Component::Delete(2),
            ]
        );
    }

    #[test]
    fn test_zero_length_components_are_dropped() {
        let mut op = TextOperation::new();
        op.retain(0).insert("").delete(0);
        assert!(op.components().is_empty());
        assert!(op.is_noop());
    }

    #[test]
    fn test_apply_insert() {
        let mut op = TextOperation::new();
        op.retain(5).insert(", world");
        assert_eq!(op.apply("hello").unwrap(), "hello, world");
    }

    #[test]
    fn test_apply_delete_and_insert() {
        let mut op = TextOperation::new();
        op.retain(5).delete(6).insert("!!!");
        assert_eq!(op.apply("hello world").unwrap(), "hello!!!");
    }

    #[test]
    fn test_apply_counts_chars_not_bytes() {
        let mut op = TextOperation::new();
        op.retain(2).insert("é").retain(1);
        assert_eq!(op.apply("ñañ").unwrap(), "ñaéñ");
    }

    #[test]
    fn test_apply_rejects_wrong_length() {
        let mut op = TextOperation::new();
        op.retain(3);
        let err = op.apply("hello").unwrap_err();
        assert!(matches!(
            err,
            OperationError::BaseLengthMismatch { expected: 3, actual: 5 }
        ));
    }

    #[test]
    fn test_from_text_and_as_text() {
        let doc = TextOperation::from_text("hello");
        assert_eq!(doc.base_len(), 0);
        assert_eq!(doc.target_len(), 5);
        assert_eq!(doc.as_text().as_deref(), Some("hello"));

        let mut edit = TextOperation::new();
        edit.retain(5);
        assert_eq!(edit.as_text(), None);
        assert_eq!(TextOperation::new().as_text().as_deref(), Some(""));
    }

    #[test]
    fn test_compose_document_with_edit() {
        let doc = TextOperation::from_text("hello");
        let mut edit = TextOperation::new();
        edit.retain(5).insert(", world");

        let composed = doc.compose(&edit).unwrap();
        assert_eq!(composed.as_text().as_deref(), Some("hello, world"));
        assert_eq!(composed, TextOperation::from_text("hello, world"));
    }

    #[test]
    fn test_compose_insert_then_delete_cancels() {
        let a = op(&[Component::Retain(2), Component::Insert("abc".into())]);
        let b = op(&[Component::Retain(2), Component::Delete(3)]);
        let composed = a.compose(&b).unwrap();
        assert!(composed.is_noop());
        assert_eq!(composed.base_len(), 2);
    }

    #[test]
    fn test_compose_rejects_mismatched_lengths() {
        let a = TextOperation::from_text("abc");
        let mut b = TextOperation::new();
        b.retain(10);
        assert!(matches!(
            a.compose(&b),
            Err(OperationError::ComposeMismatch { first_target: 3, second_base: 10 })
        ));
    }

    #[test]
    fn test_transform_concurrent_inserts_converge() {
        let base = "abc";
        let a = op(&[Component::Retain(1), Component::Insert("X".into()), Component::Retain(2)]);
        let b = op(&[Component::Retain(1), Component::Insert("Y".into()), Component::Retain(2)]);

        let (a_prime, b_prime) = a.transform(&b).unwrap();
        let left = b_prime.apply(&a.apply(base).unwrap()).unwrap();
        let right = a_prime.apply(&b.apply(base).unwrap()).unwrap();

        assert_eq!(left, right);
        assert_eq!(left, "aXYbc");
    }

    #[test]
    fn test_transform_overlapping_deletes() {
        let base = "abcdef";
        let a = op(&[Component::Retain(1), Component::Delete(3), Component::Retain(2)]);
        let b = op(&[Component::Retain(2), Component::Delete(3), Component::Retain(1)]);

        let (a_prime, b_prime) = a.transform(&b).unwrap();
        let left = b_prime.apply(&a.apply(base).unwrap()).unwrap();
        let right = a_prime.apply(&b.apply(base).unwrap()).unwrap();

        assert_eq!(left, right);
        assert_eq!(left, "af");
    }

    #[test]
    fn test_transform_rejects_different_bases() {
        let a = TextOperation::from_text("x");
        let mut b = TextOperation::new();
        b.retain(1);
        assert!(a.transform(&b).is_err());
    }

    /// Build a valid operation over a document of `len` chars from arbitrary
    /// step descriptions.
    fn build_op(len: usize, steps: &[(u8, usize, String)]) -> TextOperation {
        let mut op = TextOperation::new();
        let mut remaining = len;
        for (kind, n, text) in steps {
            match kind % 3 {
                0 => {
                    let k = n % (remaining + 1);
                    op.retain(k);
                    remaining -= k;
                }
                1 => {
                    op.insert(text);
                }
                _ => {
                    let k = n % (remaining + 1);
                    op.delete(k);
                    remaining -= k;
                }
            }
        }
        op.retain(remaining);
        op
    }

    fn steps() -> impl Strategy<Value = Vec<(u8, usize, String)>> {
        prop::collection::vec((any::<u8>(), 0usize..8, "[a-zé ]{0,4}"), 0..8)
    }

    proptest! {
        #[test]
        fn prop_compose_matches_sequential_apply(
            text in "[a-z ]{0,20}",
            s1 in steps(),
            s2 in steps(),
        ) {
            let a = build_op(text.chars().count(), &s1);
            let mid = a.apply(&text).unwrap();
            let b = build_op(mid.chars().count(), &s2);
            let end = b.apply(&mid).unwrap();

            let composed = a.compose(&b).unwrap();
            prop_assert_eq!(composed.apply(&text).unwrap(), end);
        }

        #[test]
        fn prop_transform_converges(
            text in "[a-z ]{0,20}",
            s1 in steps(),
            s2 in steps(),
        ) {
            let len = text.chars().count();
            let a = build_op(len, &s1);
            let b = build_op(len, &s2);
            let (a_prime, b_prime) = a.transform(&b).unwrap();

            let left = b_prime.apply(&a.apply(&text).unwrap()).unwrap();
            let right = a_prime.apply(&b.apply(&text).unwrap()).unwrap();
            prop_assert_eq!(left, right);
        }
    }
}
