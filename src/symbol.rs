use std::ops::Range;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use miette::SourceSpan;

/// Most labels a single program may define.
pub const MAX_LABELS: usize = 256;

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Location within source
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Span {
    offs: usize,
    len: usize,
}

impl Span {
    pub fn new(offs: usize, len: usize) -> Self {
        Span { offs, len }
    }

    /// Smallest span covering both.
    pub fn join(self, other: Span) -> Span {
        let start = self.offs.min(other.offs);
        let end = self.end().max(other.end());
        Span::new(start, end - start)
    }

    pub fn range(&self) -> Range<usize> {
        self.offs..self.offs + self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn offs(&self) -> usize {
        self.offs
    }

    pub fn end(&self) -> usize {
        self.offs + self.len
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}

impl From<Span> for Range<usize> {
    fn from(value: Span) -> Self {
        value.range()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LabelError {
    Duplicate,
    /// Table already holds [`MAX_LABELS`] entries.
    Full,
}

/// Label name -> emission address, in definition order.
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    map: FxMap<String, u16>,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable {
            map: IndexMap::with_capacity_and_hasher(MAX_LABELS, FxBuildHasher::default()),
        }
    }

    pub fn insert(&mut self, name: &str, addr: u16) -> Result<(), LabelError> {
        if self.map.contains_key(name) {
            return Err(LabelError::Duplicate);
        }
        if self.map.len() >= MAX_LABELS {
            return Err(LabelError::Full);
        }
        self.map.insert(name.to_owned(), addr);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<u16> {
        self.map.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.map.iter().map(|(name, addr)| (name.as_str(), *addr))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_definition_order() {
        let mut table = LabelTable::new();
        table.insert("start", 0).unwrap();
        table.insert("loop", 4).unwrap();
        table.insert("end", 2).unwrap();
        let names: Vec<_> = table.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["start", "loop", "end"]);
        assert_eq!(table.get("loop"), Some(4));
        assert_eq!(table.get("Loop"), None);
    }

    #[test]
    fn rejects_duplicates() {
        let mut table = LabelTable::new();
        table.insert("a", 0).unwrap();
        assert_eq!(table.insert("a", 3), Err(LabelError::Duplicate));
        assert_eq!(table.get("a"), Some(0));
    }

    #[test]
    fn limited_capacity() {
        let mut table = LabelTable::new();
        for i in 0..MAX_LABELS {
            table.insert(&format!("l{i}"), i as u16).unwrap();
        }
        assert_eq!(table.insert("one_more", 0), Err(LabelError::Full));
        assert_eq!(table.len(), MAX_LABELS);
    }

    #[test]
    fn span_join() {
        let a = Span::new(4, 2);
        let b = Span::new(9, 3);
        assert_eq!(a.join(b), Span::new(4, 8));
        assert_eq!(b.join(a).range(), 4..12);
    }
}
