//! Consistent hash ring for session affinity.
//!
//! Every host owns `virtual_nodes` points on a 64-bit ring, placed by hashing
//! its id together with the point's ordinal. A key is served by the first
//! point at or after its own hash, wrapping around at the end. Point positions
//! depend only on host ids, so adding or removing a host only remaps the keys
//! that land on that host's points.

use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use crate::domain::host::SharedHost;

const SEED: u64 = 0;

fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = XxHash64::with_seed(SEED);
    value.hash(&mut hasher);
    hasher.finish()
}

/// Sorted `(point, host index)` pairs.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: Vec<(u64, u32)>,
    virtual_nodes: usize,
}

impl HashRing {
    /// Place `virtual_nodes` points for each host.
    pub fn build(hosts: &[SharedHost], virtual_nodes: usize) -> Self {
        let mut points = Vec::with_capacity(hosts.len() * virtual_nodes);
        for (index, host) in hosts.iter().enumerate() {
            for ordinal in 0..virtual_nodes as u32 {
                let mut hasher = XxHash64::with_seed(SEED);
                host.id().hash(&mut hasher);
                ordinal.hash(&mut hasher);
                points.push((hasher.finish(), index as u32));
            }
        }

        // Colliding points are ordered by host id so the owner does not
        // depend on registration order.
        points.sort_unstable_by(|(a, a_index), (b, b_index)| {
            a.cmp(b).then_with(|| hosts[*a_index as usize].id().cmp(hosts[*b_index as usize].id()))
        });

        Self { points, virtual_nodes }
    }

    /// Virtual nodes per host this ring was built with.
    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Number of points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True for a ring without hosts.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index of the host owning `key`.
    pub fn lookup(&self, key: &str) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let hash = hash_one(key);
        let position = self.points.partition_point(|(point, _)| *point < hash);
        let (_, index) = self.points.get(position).unwrap_or(&self.points[0]);
        Some(*index as usize)
    }
}
