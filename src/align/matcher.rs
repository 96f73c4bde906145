use super::features::{hamming, Descriptor};

/// Descriptors further apart than this are never paired.
const MAX_HAMMING: u32 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

/// Brute-force nearest neighbour matching with a mutual cross-check: `q`
/// and `t` pair only when each is the other's closest descriptor.
pub fn cross_check_matches(query: &[Descriptor], train: &[Descriptor]) -> Vec<Match> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }
    let forward: Vec<(usize, u32)> = query.iter().map(|q| nearest(q, train)).collect();
    let backward: Vec<(usize, u32)> = train.iter().map(|t| nearest(t, query)).collect();

    forward
        .iter()
        .enumerate()
        .filter_map(|(qi, &(ti, distance))| {
            (backward[ti].0 == qi && distance <= MAX_HAMMING).then_some(Match {
                query: qi,
                train: ti,
                distance,
            })
        })
        .collect()
}

fn nearest(needle: &Descriptor, haystack: &[Descriptor]) -> (usize, u32) {
    let mut best = (0, u32::MAX);
    for (i, candidate) in haystack.iter().enumerate() {
        let d = hamming(needle, candidate);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutual_nearest_neighbours_survive() {
        let query = [[0u64; 4], [u64::MAX, 0, 0, 0]];
        let train = [[u64::MAX, 0, 0, 1], [1, 0, 0, 0]];
        let matches = cross_check_matches(&query, &train);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0], Match { query: 0, train: 1, distance: 1 });
        assert_eq!(matches[1], Match { query: 1, train: 0, distance: 1 });
    }

    #[test]
    fn one_sided_matches_are_dropped() {
        // Both queries prefer train 0, which prefers query 0.
        let query = [[0u64; 4], [3, 0, 0, 0]];
        let train = [[1u64, 0, 0, 0]];
        let matches = cross_check_matches(&query, &train);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].query, 0);
    }

    #[test]
    fn distant_descriptors_never_pair() {
        let query = [[0u64; 4]];
        let train = [[u64::MAX, u64::MAX, 0, 0]];
        assert!(cross_check_matches(&query, &train).is_empty());
    }
}
