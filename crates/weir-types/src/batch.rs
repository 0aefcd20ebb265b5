//! An ordered sequence of parts with a shared fate.
//!
//! A [`Batch`] is acknowledged as a unit. Once handed to a downstream
//! component via a transaction it is never mutated; processors produce new
//! batches instead.

use crate::part::Part;

/// Ordered message parts acked together.
#[derive(Debug, Default)]
pub struct Batch {
    parts: Vec<Part>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Part> {
        self.parts.get_mut(index)
    }

    pub fn push(&mut self, part: Part) {
        self.parts.push(part);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Part> {
        self.parts.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Part> {
        self.parts.iter_mut()
    }

    #[must_use]
    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }

    /// Shallow copy: part identities preserved (shared payload buffers,
    /// cleared structured caches).
    #[must_use]
    pub fn shallow_copy(&self) -> Self {
        Self {
            parts: self.parts.clone(),
        }
    }

    /// Deep copy: every part owns fresh storage.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            parts: self.parts.iter().map(Part::deep_copy).collect(),
        }
    }
}

impl Clone for Batch {
    fn clone(&self) -> Self {
        self.shallow_copy()
    }
}

impl IntoIterator for Batch {
    type Item = Part;
    type IntoIter = std::vec::IntoIter<Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Part;
    type IntoIter = std::slice::Iter<'a, Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}

impl FromIterator<Part> for Batch {
    fn from_iter<T: IntoIterator<Item = Part>>(iter: T) -> Self {
        Self {
            parts: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_of(contents: &[&str]) -> Batch {
        contents.iter().map(|c| Part::new(c.to_string())).collect()
    }

    #[test]
    fn len_and_indexing() {
        let batch = batch_of(&["a", "b", "c"]);
        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());
        let mut b = batch.clone();
        assert_eq!(b.get_mut(1).unwrap().as_bytes().unwrap().as_ref(), b"b");
        assert!(batch.get(3).is_none());
    }

    #[test]
    fn append_preserves_order() {
        let mut batch = Batch::new();
        batch.push(Part::new("first"));
        batch.push(Part::new("second"));
        let contents: Vec<Vec<u8>> = batch
            .into_iter()
            .map(|mut p| p.as_bytes().unwrap().to_vec())
            .collect();
        assert_eq!(contents, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn shallow_copy_isolates_structured_state() {
        let mut batch = batch_of(&[r#"{"n":1}"#]);
        let _ = batch.get_mut(0).unwrap().structured().unwrap();

        let mut copy = batch.shallow_copy();
        copy.get_mut(0)
            .unwrap()
            .set_structured(serde_json::json!({"n": 2}));

        assert_eq!(
            batch.get_mut(0).unwrap().structured().unwrap(),
            &serde_json::json!({"n": 1})
        );
    }

    #[test]
    fn deep_copy_clones_every_part() {
        let batch = batch_of(&["a", "b"]);
        let mut deep = batch.deep_copy();
        assert_eq!(deep.len(), 2);
        assert_eq!(deep.get_mut(0).unwrap().as_bytes().unwrap().as_ref(), b"a");
    }
}
