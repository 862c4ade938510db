pub mod lru;

use crate::cache::Line;

/// Victim selection and recency bookkeeping for one set of ways.
pub trait Replace {
    /// Way to evict from a set whose ways are all valid.
    fn victim(&self, set: &[Line]) -> usize;
    /// Marks `way` as the most recently used way of `set`.
    fn touch(&mut self, set: &mut [Line], way: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessResult {
    Hit,
    Miss,
}
