use std::{
    error, fmt,
    io::{self, Write},
    ops::Range,
};

use serde::Serialize;

use crate::{
    mesi::Mesi,
    replace::{lru::Lru, Replace},
};

pub const ADDRESS_BITS: u32 = 32;

pub const ICACHE_GEOMETRY: Geometry = Geometry {
    line_size: 64,
    n_sets: 16384,
    n_ways: 4,
};

pub const DCACHE_GEOMETRY: Geometry = Geometry {
    line_size: 64,
    n_sets: 16384,
    n_ways: 8,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub line_size: usize,
    pub n_sets: usize,
    pub n_ways: usize,
}

impl Geometry {
    pub fn validate(&self) -> Result<(), GeometryError> {
        if !self.line_size.is_power_of_two() {
            return Err(GeometryError::LineSize(self.line_size));
        }
        if !self.n_sets.is_power_of_two() {
            return Err(GeometryError::Sets(self.n_sets));
        }
        if self.n_ways == 0 {
            return Err(GeometryError::NoWays);
        }
        let (offset_bits, index_bits) = (self.offset_bits(), self.index_bits());
        if offset_bits + index_bits > ADDRESS_BITS {
            return Err(GeometryError::TooWide {
                offset_bits,
                index_bits,
            });
        }
        Ok(())
    }

    pub fn offset_bits(&self) -> u32 {
        self.line_size.ilog2()
    }

    pub fn index_bits(&self) -> u32 {
        self.n_sets.ilog2()
    }

    pub fn tag_bits(&self) -> u32 {
        ADDRESS_BITS - self.offset_bits() - self.index_bits()
    }

    /// Width of the printed LRU rank, `ceil(log2(ways))`.
    pub fn lru_bits(&self) -> u32 {
        if self.n_ways <= 1 {
            0
        } else {
            (self.n_ways - 1).ilog2() + 1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    LineSize(usize),
    Sets(usize),
    NoWays,
    TooWide { offset_bits: u32, index_bits: u32 },
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::LineSize(n) => write!(f, "line size {n} is not a power of two"),
            GeometryError::Sets(n) => write!(f, "set count {n} is not a power of two"),
            GeometryError::NoWays => write!(f, "a cache needs at least one way"),
            GeometryError::TooWide {
                offset_bits,
                index_bits,
            } => write!(
                f,
                "{offset_bits} offset bits + {index_bits} index bits exceed a {ADDRESS_BITS}-bit address"
            ),
        }
    }
}

impl error::Error for GeometryError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub offset: u32,
    pub set: usize,
    pub tag: u32,
}

#[derive(Debug)]
struct BitSection {
    shift: u32,
    mask: u32,
}

impl BitSection {
    fn new(shift: u32, width: u32) -> Self {
        let mask = match width {
            0 => 0,
            w => u32::MAX >> (ADDRESS_BITS - w),
        };
        BitSection { shift, mask }
    }

    fn apply(&self, num: u32) -> u32 {
        num.checked_shr(self.shift).unwrap_or(0) & self.mask
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Instruction,
    Data,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub reads: u64,
    pub writes: u64,
    pub hits: u64,
    pub misses: u64,
}

impl Stats {
    /// Hits as a percentage of all lookups, 0 when nothing was looked up.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 * 100.0 / total as f64
        }
    }
}

#[derive(Serialize, Debug)]
pub struct CacheStats {
    name: String,
    reads: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    writes: Option<u64>,
    hits: u64,
    misses: u64,
    hit_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    pub tag: u32,
    pub state: Mesi,
    pub lru: u32,
}

impl Line {
    fn empty(n_ways: usize) -> Self {
        Line {
            tag: 0,
            state: Mesi::Invalid,
            lru: n_ways as u32 - 1,
        }
    }
}

#[derive(Debug)]
pub struct Cache<R: Replace = Lru> {
    name: String,
    kind: CacheKind,
    geometry: Geometry,
    lines: Vec<Line>,
    offset_sec: BitSection,
    set_sec: BitSection,
    tag_sec: BitSection,
    repl: R,
    pub stats: Stats,
}

impl<R: Replace> Cache<R> {
    pub fn new(
        name: impl Into<String>,
        kind: CacheKind,
        geometry: Geometry,
        repl: R,
    ) -> Result<Self, GeometryError> {
        geometry.validate()?;

        let offset_bits = geometry.offset_bits();
        let index_bits = geometry.index_bits();

        Ok(Cache {
            name: name.into(),
            kind,
            geometry,
            lines: vec![Line::empty(geometry.n_ways); geometry.n_sets * geometry.n_ways],
            offset_sec: BitSection::new(0, offset_bits),
            set_sec: BitSection::new(offset_bits, index_bits),
            tag_sec: BitSection::new(offset_bits + index_bits, geometry.tag_bits()),
            repl,
            stats: Stats::default(),
        })
    }

    #[cfg(test)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn split_addr(&self, addr: u32) -> Addr {
        Addr {
            offset: self.offset_sec.apply(addr),
            set: self.set_sec.apply(addr) as usize,
            tag: self.tag_sec.apply(addr),
        }
    }

    fn get_set(&self, set: usize) -> Range<usize> {
        set * self.geometry.n_ways..(set + 1) * self.geometry.n_ways
    }

    pub fn set(&self, set: usize) -> &[Line] {
        &self.lines[self.get_set(set)]
    }

    pub fn line_mut(&mut self, set: usize, way: usize) -> &mut Line {
        let range = self.get_set(set);
        &mut self.lines[range][way]
    }

    /// Way holding a valid copy of `addr`, if any.
    pub fn find_way(&self, addr: &Addr) -> Option<usize> {
        self.set(addr.set)
            .iter()
            .position(|l| l.state.is_valid() && l.tag == addr.tag)
    }

    pub fn find_invalid_way(&self, set: usize) -> Option<usize> {
        self.set(set).iter().position(|l| !l.state.is_valid())
    }

    /// Picks the way a miss fills: an empty way if there is one, otherwise
    /// the replacement victim. Returns the way and the state it held before.
    pub fn allocate(&mut self, set: usize) -> (usize, Mesi) {
        if let Some(way) = self.find_invalid_way(set) {
            return (way, Mesi::Invalid);
        }
        let way = self.repl.victim(self.set(set));
        let victim = self.set(set)[way];
        tracing::debug!(
            cache = %self.name,
            set,
            way,
            tag = victim.tag,
            state = %victim.state,
            "evicting"
        );
        (way, victim.state)
    }

    pub fn touch(&mut self, set: usize, way: usize) {
        let range = self.get_set(set);
        self.repl.touch(&mut self.lines[range], way);
    }

    pub fn clear(&mut self) {
        self.lines.fill(Line::empty(self.geometry.n_ways));
        self.stats = Stats::default();
    }

    #[cfg(test)]
    pub fn valid_lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter().filter(|l| l.state.is_valid())
    }

    pub fn make_stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            reads: self.stats.reads,
            writes: (self.kind == CacheKind::Data).then_some(self.stats.writes),
            hits: self.stats.hits,
            misses: self.stats.misses,
            hit_ratio: self.stats.hit_ratio(),
        }
    }

    pub fn write_contents(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "=== {} Contents ===", self.name)?;
        let lru_bits = self.geometry.lru_bits();
        for (set, lines) in self.lines.chunks(self.geometry.n_ways).enumerate() {
            let mut valid = lines
                .iter()
                .enumerate()
                .filter(|(_way, l)| l.state.is_valid())
                .peekable();
            if valid.peek().is_none() {
                continue;
            }
            writeln!(out, "Set 0x{set:04x}:")?;
            for (way, line) in valid {
                writeln!(
                    out,
                    "  way{way} TAG=0x{:03x} STATE={}  LRU={}",
                    line.tag,
                    line.state,
                    rank_bits(line.lru, lru_bits)
                )?;
            }
        }
        Ok(())
    }

    pub fn write_stats(&self, out: &mut impl Write) -> io::Result<()> {
        let stats = &self.stats;
        writeln!(out, "=== {} Statistics ===", self.name)?;
        writeln!(out, "Cache reads     : {}", stats.reads)?;
        if self.kind == CacheKind::Data {
            writeln!(out, "Cache writes    : {}", stats.writes)?;
        }
        writeln!(out, "Cache hits      : {}", stats.hits)?;
        writeln!(out, "Cache misses    : {}", stats.misses)?;
        writeln!(out, "Cache hit ratio : {:5.2} %", stats.hit_ratio())
    }
}

fn rank_bits(rank: u32, width: u32) -> String {
    (0..width)
        .rev()
        .map(|bit| match rank.checked_shr(bit).unwrap_or(0) & 1 {
            1 => '1',
            _ => '0',
        })
        .collect()
}
