/// Ring index over the per-frame graphics resources.
#[derive(Debug, Clone)]
pub struct FrameIndex {
    current: usize,
    count: usize,
    advanced: u64,
}

impl FrameIndex {
    /// `count` is clamped to at least one slot.
    pub fn new(count: usize) -> Self {
        FrameIndex {
            current: 0,
            count: count.max(1),
            advanced: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Total number of completed advances since creation
    pub fn advanced(&self) -> u64 {
        self.advanced
    }

    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.count;
        self.advanced += 1;
        self.current
    }

    /// Start over at slot 0, possibly with a different slot count.
    pub fn reset(&mut self, count: usize) {
        self.current = 0;
        self.count = count.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_modulo_count() {
        let mut index = FrameIndex::new(3);
        let seen: Vec<usize> = (0..7).map(|_| index.advance()).collect();
        assert_eq!(seen, vec![1, 2, 0, 1, 2, 0, 1]);
        assert_eq!(index.advanced(), 7);
    }

    #[test]
    fn test_single_slot() {
        let mut index = FrameIndex::new(1);
        assert_eq!(index.advance(), 0);
        assert_eq!(index.advance(), 0);
    }

    #[test]
    fn test_zero_count_is_clamped() {
        let mut index = FrameIndex::new(0);
        assert_eq!(index.count(), 1);
        assert_eq!(index.advance(), 0);
    }

    #[test]
    fn test_reset_returns_to_zero() {
        let mut index = FrameIndex::new(2);
        index.advance();
        assert_eq!(index.current(), 1);
        index.reset(4);
        assert_eq!(index.current(), 0);
        assert_eq!(index.count(), 4);
        assert_eq!(index.advanced(), 1);
    }
}
