//! Global id → local index resolution.

use hashbrown::HashMap;

use crate::pattern::config::GidLookup;

/// Lookup structure over a rank's gid array. `LinearScan` keeps nothing and
/// scans the array on every query; `Hashed` keeps a map rebuilt on demand.
#[derive(Clone, Debug)]
pub enum GidIndex {
    LinearScan,
    Hashed(HashMap<u64, usize>),
}

impl GidIndex {
    pub fn new(strategy: GidLookup) -> Self {
        match strategy {
            GidLookup::LinearScan => GidIndex::LinearScan,
            GidLookup::Hashed => GidIndex::Hashed(HashMap::new()),
        }
    }

    /// Re-index `gids`. Returns the first duplicated gid, if any.
    pub fn rebuild(&mut self, gids: &[u64]) -> Result<(), u64> {
        match self {
            GidIndex::LinearScan => {
                let mut sorted = gids.to_vec();
                sorted.sort_unstable();
                match sorted.windows(2).find(|w| w[0] == w[1]) {
                    Some(w) => Err(w[0]),
                    None => Ok(()),
                }
            }
            GidIndex::Hashed(map) => {
                map.clear();
                map.reserve(gids.len());
                for (lid, &gid) in gids.iter().enumerate() {
                    if map.insert(gid, lid).is_some() {
                        return Err(gid);
                    }
                }
                Ok(())
            }
        }
    }

    /// Record one appended entity.
    pub fn insert(&mut self, gid: u64, lid: usize) {
        if let GidIndex::Hashed(map) = self {
            map.insert(gid, lid);
        }
    }

    pub fn find(&self, gids: &[u64], gid: u64) -> Option<usize> {
        match self {
            GidIndex::LinearScan => gids.iter().position(|&g| g == gid),
            GidIndex::Hashed(map) => map.get(&gid).copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_agree() {
        let gids = [40u64, 7, 19, 3];
        for strategy in [GidLookup::LinearScan, GidLookup::Hashed] {
            let mut idx = GidIndex::new(strategy);
            idx.rebuild(&gids).unwrap();
            assert_eq!(idx.find(&gids, 19), Some(2));
            assert_eq!(idx.find(&gids, 5), None);
        }
    }

    #[test]
    fn duplicates_are_reported() {
        for strategy in [GidLookup::LinearScan, GidLookup::Hashed] {
            let mut idx = GidIndex::new(strategy);
            assert_eq!(idx.rebuild(&[1, 2, 1]), Err(1));
        }
    }
}
