//! Virtual index map: display position -> index into a stable row slice.
//!
//! Filtering and sorting only reorder the integers; the backing rows never
//! move. Indices are stored as `u32` to keep large maps compact.

/// Ordered list of indices into a backing slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualIndexMap {
    indices: Vec<u32>,
}

impl VirtualIndexMap {
    /// `0..len` in order.
    pub fn identity(len: usize) -> Self {
        debug_assert!(len <= u32::MAX as usize, "row count exceeds index range");
        VirtualIndexMap {
            indices: (0..len as u32).collect(),
        }
    }

    pub fn from_indices(indices: Vec<u32>) -> Self {
        VirtualIndexMap { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Backing index at display position `pos`.
    #[inline]
    pub fn get(&self, pos: usize) -> Option<usize> {
        self.indices.get(pos).map(|&i| i as usize)
    }

    /// Display position of backing index `index`, if it is visible.
    pub fn position_of(&self, index: usize) -> Option<usize> {
        self.indices.iter().position(|&i| i as usize == index)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().map(|&i| i as usize)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.indices
    }

    /// Keep only indices for which `keep` returns true, preserving order.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize) -> bool,
    {
        self.indices.retain(|&i| keep(i as usize));
    }

    /// Stable sort of the indices by a comparator over backing indices.
    pub fn sort_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(usize, usize) -> std::cmp::Ordering,
    {
        self.indices.sort_by(|&a, &b| compare(a as usize, b as usize));
    }

    /// Map a display range to backing indices, clamped to the map length.
    pub fn slice(&self, start: usize, end: usize) -> &[u32] {
        let end = end.min(self.indices.len());
        let start = start.min(end);
        &self.indices[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let map = VirtualIndexMap::identity(4);
        assert_eq!(map.as_slice(), &[0, 1, 2, 3]);
        assert_eq!(map.get(2), Some(2));
        assert_eq!(map.get(4), None);
    }

    #[test]
    fn test_retain_then_sort_is_stable() {
        let keys = ["b", "a", "b", "c", "a"];
        let mut map = VirtualIndexMap::identity(keys.len());
        map.retain(|i| keys[i] != "c");
        map.sort_by(|a, b| keys[a].cmp(keys[b]));
        // Equal keys keep their original relative order
        assert_eq!(map.as_slice(), &[1, 4, 0, 2]);
        assert_eq!(map.position_of(0), Some(2));
        assert_eq!(map.position_of(3), None);
    }

    #[test]
    fn test_slice_clamps() {
        let map = VirtualIndexMap::from_indices(vec![5, 6, 7]);
        assert_eq!(map.slice(1, 10), &[6, 7]);
        assert_eq!(map.slice(5, 10), &[] as &[u32]);
    }
}
