use crate::common::sh_to_color;
use glam::{Quat, Vec3, Vec4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One decoded splat, already in engine space with activated scale/opacity.
#[derive(Debug, Clone, PartialEq)]
pub struct SplatRecord {
    pub position: Vec3,
    pub normal: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,
    pub opacity: f32,
    pub sh_dc: Vec3,
    pub sh_rest: Vec<Vec3>,
}

impl Default for SplatRecord {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            normal: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            scale: Vec3::ONE,
            opacity: 0.0,
            sh_dc: Vec3::ZERO,
            sh_rest: Vec::new(),
        }
    }
}

impl SplatRecord {
    pub fn color(&self) -> Vec4 {
        sh_to_color(self.sh_dc, self.opacity)
    }
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Immutable snapshot of a decoded splat sequence.
///
/// Cloning shares the records. A reload builds a new store with a new
/// generation; holders of an older clone keep seeing the old records.
/// Generation 0 is reserved for the empty default store.
#[derive(Debug, Clone)]
pub struct SplatStore {
    records: Arc<[SplatRecord]>,
    generation: u64,
}

impl Default for SplatStore {
    fn default() -> Self {
        Self {
            records: Arc::from(Vec::new()),
            generation: 0,
        }
    }
}

impl SplatStore {
    pub fn new(records: Vec<SplatRecord>) -> Self {
        Self {
            records: Arc::from(records),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn records(&self) -> &[SplatRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn shares_records(&self, other: &SplatStore) -> bool {
        Arc::ptr_eq(&self.records, &other.records)
    }

    fn get(&self, index: i32) -> Option<&SplatRecord> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.records.get(i))
    }

    // Per-index queries. Out-of-range indices return the documented default.

    pub fn count(&self) -> i32 {
        i32::try_from(self.records.len()).unwrap_or(i32::MAX)
    }

    pub fn position(&self, index: i32) -> Vec3 {
        self.get(index).map_or(Vec3::ZERO, |s| s.position)
    }

    pub fn scale(&self, index: i32) -> Vec3 {
        self.get(index).map_or(Vec3::ONE, |s| s.scale)
    }

    pub fn orientation(&self, index: i32) -> Quat {
        self.get(index).map_or(Quat::IDENTITY, |s| s.orientation)
    }

    pub fn opacity(&self, index: i32) -> f32 {
        self.get(index).map_or(0.0, |s| s.opacity)
    }

    /// Base color multiplied by `tint` (rgb only), opacity in alpha.
    pub fn color(&self, index: i32, tint: Vec4) -> Vec4 {
        self.get(index).map_or(Vec4::ZERO, |s| {
            let c = s.color();
            (c.truncate() * tint.truncate()).extend(c.w)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SplatStore {
        SplatStore::new(vec![SplatRecord {
            position: Vec3::new(1.0, 2.0, 3.0),
            scale: Vec3::splat(4.0),
            orientation: Quat::from_xyzw(0.0, 1.0, 0.0, 0.0),
            opacity: 0.75,
            sh_dc: Vec3::ZERO,
            ..Default::default()
        }])
    }

    #[test]
    fn queries_return_record_values() {
        let s = store();
        assert_eq!(s.count(), 1);
        assert_eq!(s.position(0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(s.scale(0), Vec3::splat(4.0));
        assert_eq!(s.orientation(0), Quat::from_xyzw(0.0, 1.0, 0.0, 0.0));
        assert_eq!(s.opacity(0), 0.75);
        let c = s.color(0, Vec4::new(1.0, 0.5, 0.0, 1.0));
        assert_eq!(c, Vec4::new(0.5, 0.25, 0.0, 0.75));
    }

    #[test]
    fn out_of_range_queries_return_defaults() {
        let s = store();
        for i in [-1, 1, i32::MAX] {
            assert_eq!(s.position(i), Vec3::ZERO);
            assert_eq!(s.scale(i), Vec3::ONE);
            assert_eq!(s.orientation(i), Quat::IDENTITY);
            assert_eq!(s.opacity(i), 0.0);
            assert_eq!(s.color(i, Vec4::ONE), Vec4::ZERO);
        }
    }

    #[test]
    fn replacing_a_store_leaves_old_snapshots_intact() {
        let first = store();
        let reader = first.clone();
        let second = SplatStore::new(Vec::new());
        assert!(reader.shares_records(&first));
        assert_ne!(first.generation(), second.generation());
        drop(first);
        assert_eq!(reader.len(), 1);
        assert!(second.is_empty());
    }
}
