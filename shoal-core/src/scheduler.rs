//! Fragment scheduler: deterministic round-robin of fragment indices over sources.

/// Source for fragment `index`: `sources[index mod k]`. `None` when there are no sources.
pub fn source_for<T>(index: usize, sources: &[T]) -> Option<&T> {
    if sources.is_empty() {
        return None;
    }
    sources.get(index % sources.len())
}

/// Assign each of `fragment_count` indices to a source. Empty when there are no sources.
pub fn assign_fragments<T>(fragment_count: usize, sources: &[T]) -> Vec<(usize, &T)> {
    if sources.is_empty() {
        return vec![];
    }
    (0..fragment_count)
        .map(|i| (i, &sources[i % sources.len()]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_zero_sources_empty() {
        let sources: Vec<&str> = vec![];
        assert!(assign_fragments(4, &sources).is_empty());
        assert!(source_for(0, &sources).is_none());
    }

    #[test]
    fn assign_to_single_source() {
        let sources = vec!["a:1"];
        let out = assign_fragments(3, &sources);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|(_, s)| **s == "a:1"));
    }

    #[test]
    fn assign_round_robin() {
        let sources = vec!["s0:1", "s1:1"];
        let out = assign_fragments(4, &sources);
        let picked: Vec<&str> = out.iter().map(|(_, s)| **s).collect();
        assert_eq!(picked, vec!["s0:1", "s1:1", "s0:1", "s1:1"]);
    }

    #[test]
    fn source_for_matches_modulo() {
        let sources = vec![10, 20, 30];
        for i in 0..20 {
            assert_eq!(source_for(i, &sources), Some(&sources[i % 3]));
            assert_eq!(source_for(i, &sources), source_for(i, &sources));
        }
    }
}
