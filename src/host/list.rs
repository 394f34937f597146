//! The host's segmented list: a chain of fixed size parts.
//!
//! Elements are pushed into the last part until it is full, then a new part is
//! linked after it. Walking the list visits the parts in order and every
//! element of a part up to its count, so insertion order is preserved.
use std::fmt;

const DEFAULT_PART_SIZE: usize = 20;

struct Part<T> {
    elts: Vec<T>,
}

pub struct PartList<T> {
    parts: Vec<Part<T>>,
    nalloc: usize,
}

impl<T> PartList<T> {
    pub fn new() -> Self {
        PartList::with_part_size(DEFAULT_PART_SIZE)
    }

    /// `n` is the number of elements each part holds
    pub fn with_part_size(n: usize) -> Self {
        let nalloc = n.max(1);
        PartList {
            parts: vec![Part {
                elts: Vec::with_capacity(nalloc),
            }],
            nalloc,
        }
    }

    /// append an element, linking a new part when the last one is full
    pub fn push(&mut self, elt: T) -> &mut T {
        let full = self
            .parts
            .last()
            .map_or(true, |p| p.elts.len() == self.nalloc);
        if full {
            self.parts.push(Part {
                elts: Vec::with_capacity(self.nalloc),
            });
        }
        let last = self.parts.len() - 1;
        let part = &mut self.parts[last];
        part.elts.push(elt);
        let n = part.elts.len() - 1;
        &mut part.elts[n]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.parts.iter().flat_map(|p| p.elts.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.parts.iter_mut().flat_map(|p| p.elts.iter_mut())
    }

    pub fn len(&self) -> usize {
        self.parts.iter().map(|p| p.elts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// number of linked parts, at least one
    pub fn parts(&self) -> usize {
        self.parts.len()
    }

    /// remove every element for which `f` returns false, compacting the
    /// survivors toward the head of the list; emptied trailing parts are unlinked
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, mut f: F) {
        let old = std::mem::replace(&mut self.parts, Vec::new());
        let nalloc = self.nalloc;
        self.parts.push(Part {
            elts: Vec::with_capacity(nalloc),
        });
        for elt in old.into_iter().flat_map(|p| p.elts.into_iter()) {
            if f(&elt) {
                self.push(elt);
            }
        }
    }
}

impl<T> Default for PartList<T> {
    fn default() -> Self {
        PartList::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for PartList<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_links_new_parts() {
        let mut list = PartList::with_part_size(2);
        for i in 0..5 {
            list.push(i);
        }
        assert_eq!(list.parts(), 3);
        assert_eq!(list.len(), 5);
        assert_eq!(list.iter().cloned().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn retain_compacts() {
        let mut list = PartList::with_part_size(2);
        for i in 0..7 {
            list.push(i);
        }
        list.retain(|v| v % 3 != 0);
        assert_eq!(list.iter().cloned().collect::<Vec<_>>(), vec![1, 2, 4, 5]);
        assert_eq!(list.parts(), 2);

        list.retain(|_| false);
        assert!(list.is_empty());
        assert_eq!(list.parts(), 1);
        list.push(9);
        assert_eq!(list.iter().cloned().collect::<Vec<_>>(), vec![9]);
    }
}
