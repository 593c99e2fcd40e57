use std::fmt;

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Exp1, StandardNormal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    F32,
    U8,
}

/// Space of arrays with a fixed shape whose elements lie in `[low, high]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxSpace {
    pub low: f32,
    pub high: f32,
    pub shape: Vec<usize>,
    pub dtype: Dtype,
}

impl BoxSpace {
    pub fn new(low: f32, high: f32, shape: &[usize], dtype: Dtype) -> Self {
        assert!(low <= high, "Box low must not exceed high");
        BoxSpace {
            low,
            high,
            shape: shape.to_vec(),
            dtype,
        }
    }

    /// `(-inf, inf)` floats.
    pub fn unbounded(shape: &[usize]) -> Self {
        BoxSpace::new(f32::NEG_INFINITY, f32::INFINITY, shape, Dtype::F32)
    }

    /// Bytes in `[0, 255]`.
    pub fn pixels(shape: &[usize]) -> Self {
        BoxSpace::new(0.0, 255.0, shape, Dtype::U8)
    }

    /// Floats in `[-1, 1]`.
    pub fn symmetric(shape: &[usize]) -> Self {
        BoxSpace::new(-1.0, 1.0, shape, Dtype::F32)
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn contains(&self, value: &ArrayD<f32>) -> bool {
        value.shape() == &self.shape[..] && value.iter().all(|&v| self.contains_scalar(v))
    }

    /// Like `contains`, for a flattened value.
    pub fn contains_slice(&self, value: &[f32]) -> bool {
        value.len() == self.num_elements() && value.iter().all(|&v| self.contains_scalar(v))
    }

    fn contains_scalar(&self, v: f32) -> bool {
        // NaN fails both comparisons.
        let in_bounds = v >= self.low && v <= self.high;
        match self.dtype {
            Dtype::F32 => in_bounds,
            Dtype::U8 => in_bounds && v.fract() == 0.0,
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> ArrayD<f32> {
        ArrayD::from_shape_simple_fn(IxDyn(&self.shape), || self.sample_scalar(rng))
    }

    fn sample_scalar<R: Rng>(&self, rng: &mut R) -> f32 {
        let x = match (self.low.is_finite(), self.high.is_finite()) {
            (true, true) => {
                if self.low == self.high {
                    self.low
                } else {
                    rng.gen_range(self.low..=self.high)
                }
            }
            (true, false) => self.low + rng.sample::<f32, _>(Exp1),
            (false, true) => self.high - rng.sample::<f32, _>(Exp1),
            (false, false) => rng.sample::<f32, _>(StandardNormal),
        };
        match self.dtype {
            Dtype::F32 => x,
            Dtype::U8 => x.round(),
        }
    }
}

impl fmt::Display for BoxSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dtype = match self.dtype {
            Dtype::F32 => "float32",
            Dtype::U8 => "uint8",
        };
        write!(
            f,
            "Box({}, {}, {:?}, {})",
            self.low, self.high, self.shape, dtype
        )
    }
}
