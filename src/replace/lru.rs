use crate::cache::Line;

use super::Replace;

/// True LRU kept as a rank per line: 0 is the most recently used way and
/// `ways - 1` the least recently used one.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lru;

impl Replace for Lru {
    fn victim(&self, set: &[Line]) -> usize {
        // Only a strictly greater rank replaces the candidate, so the lowest
        // way wins a tie.
        set.iter()
            .enumerate()
            .fold((0, 0), |(victim_way, max_rank), (way, line)| {
                if line.lru > max_rank {
                    (way, line.lru)
                } else {
                    (victim_way, max_rank)
                }
            })
            .0
    }

    fn touch(&mut self, set: &mut [Line], way: usize) {
        let prev_rank = set[way].lru;
        // Ways that were more recent than `way` age by one. Untouched ways
        // all sit at `ways - 1` and stay there until they are used.
        for line in set.iter_mut() {
            if line.lru < prev_rank {
                line.lru += 1;
            }
        }
        set[way].lru = 0;
    }
}
