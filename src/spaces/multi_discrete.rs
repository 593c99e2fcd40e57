use std::fmt;

use rand::Rng;

/// Product of discrete spaces, dimension `i` takes values in `0..nvec[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiDiscrete {
    pub nvec: Vec<usize>,
}

impl MultiDiscrete {
    pub fn new(nvec: Vec<usize>) -> Self {
        assert!(
            !nvec.is_empty(),
            "MultiDiscrete must have at least 1 dimension"
        );
        assert!(
            nvec.iter().all(|&n| n > 0),
            "All dimensions must have at least 1 element"
        );
        MultiDiscrete { nvec }
    }

    pub fn ndim(&self) -> usize {
        self.nvec.len()
    }

    pub fn contains(&self, value: &[i64]) -> bool {
        value.len() == self.nvec.len()
            && value
                .iter()
                .zip(self.nvec.iter())
                .all(|(&v, &n)| v >= 0 && (v as u64) < n as u64)
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<i64> {
        self.nvec
            .iter()
            .map(|&n| rng.gen_range(0..n) as i64)
            .collect()
    }
}

impl fmt::Display for MultiDiscrete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiDiscrete({:?})", self.nvec)
    }
}
