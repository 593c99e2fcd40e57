use std::fmt;

use rand::Rng;

/// Space of the integers `0..n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrete {
    pub n: usize,
}

impl Discrete {
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "Discrete space must have at least 1 element");
        Discrete { n }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= 0 && (value as u64) < self.n as u64
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> i64 {
        rng.gen_range(0..self.n) as i64
    }
}

impl fmt::Display for Discrete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Discrete({})", self.n)
    }
}
