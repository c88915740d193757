//! Fragment set: split a file into fixed-size fragments, serve them by index.

use std::ops::Range;

/// Default maximum fragment size in bytes.
pub const DEFAULT_FRAGMENT_SIZE: usize = 512 * 1024; // 512 KiB

/// Number of fragments a file of `total_len` bytes splits into.
pub fn fragment_count(total_len: usize, fragment_size: usize) -> usize {
    let size = effective_size(fragment_size);
    total_len.div_ceil(size)
}

fn effective_size(fragment_size: usize) -> usize {
    if fragment_size == 0 {
        DEFAULT_FRAGMENT_SIZE
    } else {
        fragment_size
    }
}

/// Byte ranges of each fragment, in order. The last range may be shorter.
pub fn split_ranges(total_len: usize, fragment_size: usize) -> Vec<Range<usize>> {
    let size = effective_size(fragment_size);
    let mut out = Vec::with_capacity(fragment_count(total_len, size));
    let mut start = 0usize;
    while start < total_len {
        let end = (start + size).min(total_len);
        out.push(start..end);
        start = end;
    }
    out
}

/// One file's bytes partitioned into ordered fragments. Immutable once built.
#[derive(Debug, Clone)]
pub struct FragmentSet {
    data: Vec<u8>,
    ranges: Vec<Range<usize>>,
    fragment_size: usize,
}

impl FragmentSet {
    /// Split `data` into fragments of at most `fragment_size` bytes (0 selects the default).
    pub fn split(data: Vec<u8>, fragment_size: usize) -> Self {
        let fragment_size = effective_size(fragment_size);
        let ranges = split_ranges(data.len(), fragment_size);
        Self {
            data,
            ranges,
            fragment_size,
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Total size of the underlying file.
    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    /// Bytes of fragment `index`, or `None` when out of range.
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.ranges.get(index).map(|r| &self.data[r.clone()])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.ranges.iter().map(|r| &self.data[r.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn concat(set: &FragmentSet) -> Vec<u8> {
        set.iter().flat_map(|f| f.iter().copied()).collect()
    }

    #[test]
    fn split_fragments() {
        let data: Vec<u8> = (0..100).map(|i| i as u8).collect();
        let set = FragmentSet::split(data, 30);
        assert_eq!(set.len(), 4);
        assert_eq!(set.get(0).unwrap().len(), 30);
        assert_eq!(set.get(3).unwrap(), &[90u8, 91, 92, 93, 94, 95, 96, 97, 98, 99]);
        assert!(set.get(4).is_none());
    }

    #[test]
    fn split_exact_multiple() {
        let set = FragmentSet::split(vec![7u8; 90], 30);
        assert_eq!(set.len(), 3);
        assert!(set.iter().all(|f| f.len() == 30));
    }

    #[test]
    fn split_single_fragment() {
        let set = FragmentSet::split(vec![1u8; 10], 100);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(0).unwrap().len(), 10);
    }

    #[test]
    fn split_zero_length() {
        let set = FragmentSet::split(Vec::new(), 30);
        assert!(set.is_empty());
        assert_eq!(fragment_count(0, 30), 0);
        assert!(set.get(0).is_none());
    }

    #[test]
    fn split_zero_fragment_size_uses_default() {
        let set = FragmentSet::split(vec![0u8; DEFAULT_FRAGMENT_SIZE * 2], 0);
        assert_eq!(set.len(), 2);
        assert_eq!(set.fragment_size(), DEFAULT_FRAGMENT_SIZE);
    }

    #[test]
    fn one_million_bytes_make_two_fragments() {
        let set = FragmentSet::split(vec![0xAB; 1_000_000], DEFAULT_FRAGMENT_SIZE);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(0).unwrap().len(), 524_288);
        assert_eq!(set.get(1).unwrap().len(), 475_712);
    }

    #[test]
    fn concatenation_reproduces_input() {
        let mut rng = rand::thread_rng();
        for (len, size) in [(1usize, 1usize), (17, 4), (4096, 1000), (5000, 5000), (12345, 7)] {
            let mut data = vec![0u8; len];
            rng.fill_bytes(&mut data);
            let set = FragmentSet::split(data.clone(), size);
            assert_eq!(set.len(), len.div_ceil(size));
            assert_eq!(concat(&set), data);
        }
    }
}
