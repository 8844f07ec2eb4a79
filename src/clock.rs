//! Per-kind clock cache (spec section 4.5).
//!
//! Grounded on `replay-time.c`'s static `cached_clock` array: one
//! cached value per [`crate::wire::ClockKind`], refreshed on RECORD
//! and replayed verbatim on PLAY so that repeated reads of the same
//! clock kind within an instruction are stable.

use crate::wire::ClockKind;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClockCache {
    values: [i64; ClockKind::COUNT],
    valid: [bool; ClockKind::COUNT],
}

impl ClockCache {
    pub fn new() -> Self {
        Self {
            values: [0; ClockKind::COUNT],
            valid: [false; ClockKind::COUNT],
        }
    }

    pub fn get(&self, kind: ClockKind) -> Option<i64> {
        let idx = kind.index() as usize;
        self.valid[idx].then(|| self.values[idx])
    }

    pub fn set(&mut self, kind: ClockKind, value: i64) {
        let idx = kind.index() as usize;
        self.values[idx] = value;
        self.valid[idx] = true;
    }

    pub fn invalidate(&mut self, kind: ClockKind) {
        self.valid[kind.index() as usize] = false;
    }

    pub fn invalidate_all(&mut self) {
        self.valid = [false; ClockKind::COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_kind_reads_as_none() {
        let cache = ClockCache::new();
        assert_eq!(cache.get(ClockKind::Virtual), None);
    }

    #[test]
    fn set_then_get_round_trips_independently_per_kind() {
        let mut cache = ClockCache::new();
        cache.set(ClockKind::Host, 42);
        assert_eq!(cache.get(ClockKind::Host), Some(42));
        assert_eq!(cache.get(ClockKind::Rdtsc), None);
        assert_eq!(cache.get(ClockKind::Virtual), None);
    }

    #[test]
    fn invalidate_clears_only_that_kind() {
        let mut cache = ClockCache::new();
        cache.set(ClockKind::Host, 1);
        cache.set(ClockKind::Virtual, 2);
        cache.invalidate(ClockKind::Host);
        assert_eq!(cache.get(ClockKind::Host), None);
        assert_eq!(cache.get(ClockKind::Virtual), Some(2));
    }
}
