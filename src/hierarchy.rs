use std::io::{self, Write};

use crate::{
    bus::{Bus, BusEvent},
    cache::{
        Cache, CacheKind, CacheStats, Geometry, GeometryError, DCACHE_GEOMETRY, ICACHE_GEOMETRY,
    },
    mesi::Mesi,
    replace::{lru::Lru, AccessResult},
};

/// The split L1: an instruction cache, a data cache and the bus both of them
/// report to.
#[derive(Debug)]
pub struct Hierarchy<B: Bus> {
    pub icache: Cache,
    pub dcache: Cache,
    bus: B,
}

impl<B: Bus> Hierarchy<B> {
    pub fn new(bus: B) -> Result<Self, GeometryError> {
        Self::with_geometry(ICACHE_GEOMETRY, DCACHE_GEOMETRY, bus)
    }

    pub fn with_geometry(
        icache: Geometry,
        dcache: Geometry,
        bus: B,
    ) -> Result<Self, GeometryError> {
        Ok(Hierarchy {
            icache: Cache::new("I$", CacheKind::Instruction, icache, Lru)?,
            dcache: Cache::new("D$", CacheKind::Data, dcache, Lru)?,
            bus,
        })
    }

    #[cfg(test)]
    pub fn bus(&self) -> &B {
        &self.bus
    }

    #[cfg(test)]
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn fetch(&mut self, addr: u32) -> AccessResult {
        let cache = &mut self.icache;
        let addr = cache.split_addr(addr);
        cache.stats.reads += 1;

        if let Some(way) = cache.find_way(&addr) {
            cache.stats.hits += 1;
            let line = cache.line_mut(addr.set, way);
            line.state = line.state.on_read_hit();
            cache.touch(addr.set, way);
            tracing::trace!(set = addr.set, way, "fetch hit");
            return AccessResult::Hit;
        }

        cache.stats.misses += 1;
        let (way, prior) = cache.allocate(addr.set);
        debug_assert_ne!(prior, Mesi::Modified);
        let line = cache.line_mut(addr.set, way);
        line.tag = addr.tag;
        line.state = Mesi::Exclusive;
        self.bus.signal(BusEvent::Read);
        cache.touch(addr.set, way);
        tracing::trace!(set = addr.set, way, offset = addr.offset, "fetch miss");
        AccessResult::Miss
    }

    pub fn read(&mut self, addr: u32) -> AccessResult {
        let cache = &mut self.dcache;
        let addr = cache.split_addr(addr);
        cache.stats.reads += 1;

        if let Some(way) = cache.find_way(&addr) {
            cache.stats.hits += 1;
            let line = cache.line_mut(addr.set, way);
            line.state = line.state.on_read_hit();
            cache.touch(addr.set, way);
            tracing::trace!(set = addr.set, way, "read hit");
            return AccessResult::Hit;
        }

        cache.stats.misses += 1;
        let (way, prior) = cache.allocate(addr.set);
        if prior == Mesi::Modified {
            tracing::debug!(set = addr.set, way, "write back");
            self.bus.signal(BusEvent::Write);
        }
        let line = cache.line_mut(addr.set, way);
        line.tag = addr.tag;
        line.state = Mesi::Exclusive;
        self.bus.signal(BusEvent::Read);
        cache.touch(addr.set, way);
        tracing::trace!(set = addr.set, way, offset = addr.offset, "read miss");
        AccessResult::Miss
    }

    pub fn write(&mut self, addr: u32) -> AccessResult {
        let cache = &mut self.dcache;
        let addr = cache.split_addr(addr);
        cache.stats.writes += 1;

        if let Some(way) = cache.find_way(&addr) {
            cache.stats.hits += 1;
            let line = cache.line_mut(addr.set, way);
            line.state = line.state.on_write_hit();
            cache.touch(addr.set, way);
            tracing::trace!(set = addr.set, way, "write hit");
            return AccessResult::Hit;
        }

        cache.stats.misses += 1;
        let (way, prior) = cache.allocate(addr.set);
        if prior == Mesi::Modified {
            tracing::debug!(set = addr.set, way, "write back");
            self.bus.signal(BusEvent::Write);
        }
        let line = cache.line_mut(addr.set, way);
        line.tag = addr.tag;
        self.bus.signal(BusEvent::ReadForOwnership);
        // Arrives Exclusive, the first write goes through to L2 and leaves
        // the line Modified.
        line.state = Mesi::Exclusive;
        self.bus.signal(BusEvent::Write);
        line.state = Mesi::Modified;
        cache.touch(addr.set, way);
        tracing::trace!(set = addr.set, way, offset = addr.offset, "write miss");
        AccessResult::Miss
    }

    /// Invalidate request coming from L2.
    pub fn invalidate(&mut self, addr: u32) {
        let cache = &mut self.dcache;
        let addr = cache.split_addr(addr);
        if let Some(way) = cache.find_way(&addr) {
            cache.line_mut(addr.set, way).state = Mesi::Invalid;
            tracing::trace!(set = addr.set, way, "invalidated");
        }
    }

    /// Read-for-ownership snoop coming from L2: hand the data over and drop
    /// the local copy.
    pub fn snoop_rfo(&mut self, addr: u32) {
        let cache = &mut self.dcache;
        let addr = cache.split_addr(addr);
        if let Some(way) = cache.find_way(&addr) {
            let line = cache.line_mut(addr.set, way);
            if matches!(line.state, Mesi::Modified | Mesi::Exclusive | Mesi::Shared) {
                self.bus.signal(BusEvent::ReturnData);
                line.state = Mesi::Invalid;
                tracing::trace!(set = addr.set, way, "snooped");
            }
        }
    }

    pub fn clear(&mut self) {
        self.icache.clear();
        self.dcache.clear();
    }

    pub fn write_contents(&self, out: &mut impl Write) -> io::Result<()> {
        self.dcache.write_contents(out)?;
        self.icache.write_contents(out)
    }

    pub fn write_stats(&self, out: &mut impl Write) -> io::Result<()> {
        self.icache.write_stats(out)?;
        self.dcache.write_stats(out)
    }

    pub fn make_stats(&self) -> Vec<CacheStats> {
        vec![self.icache.make_stats(), self.dcache.make_stats()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Stats;

    const SMALL: Geometry = Geometry {
        line_size: 64,
        n_sets: 16,
        n_ways: 4,
    };

    fn small() -> Hierarchy<Vec<BusEvent>> {
        Hierarchy::with_geometry(SMALL, SMALL, Vec::new()).unwrap()
    }

    /// Address with the given tag landing in set 0 of `SMALL`.
    fn set0(tag: u32) -> u32 {
        tag << 10
    }

    fn state_of(cache: &Cache, addr: u32) -> Option<Mesi> {
        let a = cache.split_addr(addr);
        cache.find_way(&a).map(|way| cache.set(a.set)[way].state)
    }

    #[test]
    fn read_miss_then_hit() {
        let mut h = small();
        assert_eq!(h.read(0x1234), AccessResult::Miss);
        assert_eq!(h.bus(), &[BusEvent::Read]);
        assert_eq!(state_of(&h.dcache, 0x1234), Some(Mesi::Exclusive));

        assert_eq!(h.read(0x1234), AccessResult::Hit);
        assert_eq!(
            h.dcache.stats,
            Stats {
                reads: 2,
                writes: 0,
                hits: 1,
                misses: 1
            }
        );
        assert_eq!(state_of(&h.dcache, 0x1234), Some(Mesi::Shared));
        assert_eq!(h.bus().len(), 1);
    }

    #[test]
    fn same_line_different_offset_hits() {
        let mut h = small();
        h.read(0x1000);
        assert_eq!(h.read(0x103f), AccessResult::Hit);
        assert_eq!(h.read(0x1040), AccessResult::Miss);
    }

    #[test]
    fn write_hit_on_clean_line_is_silent() {
        let mut h = small();
        h.read(0x80);
        h.read(0x80);
        assert_eq!(state_of(&h.dcache, 0x80), Some(Mesi::Shared));
        h.bus_mut().clear();

        assert_eq!(h.write(0x80), AccessResult::Hit);
        assert_eq!(state_of(&h.dcache, 0x80), Some(Mesi::Modified));
        assert!(h.bus().is_empty());

        h.read(0x100);
        h.bus_mut().clear();
        h.write(0x100);
        assert_eq!(state_of(&h.dcache, 0x100), Some(Mesi::Modified));
        assert!(h.bus().is_empty());
    }

    #[test]
    fn write_miss_takes_ownership_and_writes_through() {
        let mut h = small();
        assert_eq!(h.write(0x40), AccessResult::Miss);
        assert_eq!(h.bus(), &[BusEvent::ReadForOwnership, BusEvent::Write]);
        assert_eq!(state_of(&h.dcache, 0x40), Some(Mesi::Modified));
        assert_eq!(
            h.dcache.stats,
            Stats {
                reads: 0,
                writes: 1,
                hits: 0,
                misses: 1
            }
        );
    }

    #[test]
    fn evicting_modified_line_writes_back_first() {
        let mut h = small();
        h.write(set0(1));
        for tag in 2..=4 {
            h.read(set0(tag));
        }
        h.bus_mut().clear();

        h.write(set0(5));
        assert_eq!(
            h.bus(),
            &[BusEvent::Write, BusEvent::ReadForOwnership, BusEvent::Write]
        );
        assert_eq!(state_of(&h.dcache, set0(1)), None);

        h.bus_mut().clear();
        h.read(set0(6));
        assert_eq!(h.bus(), &[BusEvent::Read]);
    }

    #[test]
    fn read_miss_evicting_modified_line_writes_back() {
        let mut h = small();
        h.write(set0(1));
        for tag in 2..=4 {
            h.read(set0(tag));
        }
        h.bus_mut().clear();
        h.read(set0(5));
        assert_eq!(h.bus(), &[BusEvent::Write, BusEvent::Read]);
    }

    #[test]
    fn one_read_past_capacity_evicts_first_line() {
        let mut h = small();
        for tag in 1..=5 {
            h.read(set0(tag));
        }
        assert_eq!(state_of(&h.dcache, set0(1)), None);
        for tag in 2..=5 {
            assert_eq!(state_of(&h.dcache, set0(tag)), Some(Mesi::Exclusive));
        }
        assert_eq!(h.dcache.valid_lines().count(), 4);
    }

    #[test]
    fn recently_used_line_survives_eviction() {
        let mut h = small();
        for tag in 1..=4 {
            h.read(set0(tag));
        }
        h.read(set0(1));
        h.read(set0(5));
        assert!(state_of(&h.dcache, set0(1)).is_some());
        assert_eq!(state_of(&h.dcache, set0(2)), None);
    }

    #[test]
    fn invalidate_drops_line_without_side_effects() {
        let mut h = small();
        h.write(0x40);
        h.bus_mut().clear();
        let before = h.dcache.stats;
        let ranks: Vec<u32> = h.dcache.set(1).iter().map(|l| l.lru).collect();

        h.invalidate(0x40);
        assert_eq!(state_of(&h.dcache, 0x40), None);
        assert_eq!(h.dcache.stats, before);
        assert_eq!(h.dcache.set(1).iter().map(|l| l.lru).collect::<Vec<_>>(), ranks);
        assert!(h.bus().is_empty());

        h.invalidate(0x9999_0000);
        assert!(h.bus().is_empty());
    }

    #[test]
    fn invalidated_way_is_refilled_first() {
        let mut h = small();
        for tag in 1..=4 {
            h.read(set0(tag));
        }
        h.invalidate(set0(3));
        h.read(set0(9));
        let a = h.dcache.split_addr(set0(9));
        assert_eq!(h.dcache.find_way(&a), Some(2));
        assert!(state_of(&h.dcache, set0(1)).is_some());
    }

    #[test]
    fn snoop_returns_data_and_invalidates() {
        let mut h = small();
        h.write(0x40);
        h.read(0x80);
        h.read(0x80);
        h.bus_mut().clear();

        h.snoop_rfo(0x40);
        h.snoop_rfo(0x80);
        h.snoop_rfo(0xC0);
        assert_eq!(h.bus(), &[BusEvent::ReturnData, BusEvent::ReturnData]);
        assert_eq!(h.dcache.valid_lines().count(), 0);
        assert_eq!(h.dcache.stats.reads, 2);
    }

    #[test]
    fn fetch_uses_instruction_cache_only() {
        let mut h = small();
        assert_eq!(h.fetch(0x400), AccessResult::Miss);
        assert_eq!(h.fetch(0x400), AccessResult::Hit);
        assert_eq!(state_of(&h.icache, 0x400), Some(Mesi::Shared));
        assert_eq!(h.bus(), &[BusEvent::Read]);
        assert_eq!(h.icache.stats.reads, 2);
        assert_eq!(h.dcache.stats, Stats::default());
        assert_eq!(h.read(0x400), AccessResult::Miss);
    }

    #[test]
    fn instruction_lines_never_become_modified() {
        let mut h = small();
        let mut rng = fastrand::Rng::with_seed(99);
        for _ in 0..5_000 {
            h.fetch(rng.u32(..) & 0xFFFF);
            assert!(h.icache.valid_lines().all(|l| l.state != Mesi::Modified));
        }
        assert!(!h.bus().contains(&BusEvent::Write));
    }

    #[test]
    fn clear_empties_both_caches() {
        let mut h = small();
        h.fetch(0x10);
        h.write(0x20);
        h.read(0x30_000);
        h.clear();

        assert_eq!(h.icache.stats, Stats::default());
        assert_eq!(h.dcache.stats, Stats::default());
        let mut out = Vec::new();
        h.write_contents(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "=== D$ Contents ===\n=== I$ Contents ===\n"
        );
    }

    #[test]
    fn contents_print_data_cache_first() {
        let mut h = small();
        h.fetch(0x0);
        h.read(0x0);
        h.read(set0(2));
        let mut out = Vec::new();
        h.write_contents(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "=== D$ Contents ===\n\
             Set 0x0000:\n  \
             way0 TAG=0x000 STATE=E  LRU=01\n  \
             way1 TAG=0x002 STATE=E  LRU=00\n\
             === I$ Contents ===\n\
             Set 0x0000:\n  \
             way0 TAG=0x000 STATE=E  LRU=00\n"
        );
    }

    #[test]
    fn stats_report_lists_instruction_cache_first() {
        let mut h = small();
        h.fetch(0x0);
        h.write(0x0);
        h.write(0x0);
        let mut out = Vec::new();
        h.write_stats(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let i = text.find("=== I$ Statistics ===").unwrap();
        let d = text.find("=== D$ Statistics ===").unwrap();
        assert!(i < d);
        assert!(text.ends_with(
            "Cache writes    : 2\n\
             Cache hits      : 1\n\
             Cache misses    : 1\n\
             Cache hit ratio : 50.00 %\n"
        ));
        assert_eq!(h.make_stats().len(), 2);
    }

    #[test]
    fn full_size_caches_build() {
        let h = Hierarchy::new(Vec::new()).unwrap();
        assert_eq!(h.icache.geometry(), ICACHE_GEOMETRY);
        assert_eq!(h.dcache.geometry(), DCACHE_GEOMETRY);
        assert_eq!(h.dcache.set(DCACHE_GEOMETRY.n_sets - 1).len(), 8);
    }
}
