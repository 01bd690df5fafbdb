/*!
Moving-average filter for accepted GPS fixes.
*/

use num_traits::{Float, NumCast};
use std::collections::VecDeque;

/// Default number of samples averaged per axis
pub const DEFAULT_WINDOW: usize = 10;

/// Arithmetic mean over the last `window` samples
#[derive(Debug, Clone)]
pub struct MovingAverage<T> {
    window: usize,
    samples: VecDeque<T>,
}

impl<T: Float> MovingAverage<T> {
    /// Create a filter; a window of 0 is treated as 1
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Push a sample, evicting the oldest once full, and return the mean
    pub fn update(&mut self, value: T) -> T {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.mean()
    }

    /// Mean of the current window (zero when empty)
    pub fn mean(&self) -> T {
        if self.samples.is_empty() {
            return T::zero();
        }
        let sum = self.samples.iter().fold(T::zero(), |acc, &v| acc + v);
        // len <= window, always representable
        sum / <T as NumCast>::from(self.samples.len()).unwrap_or_else(T::one)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Independent moving averages over x and y
#[derive(Debug, Clone)]
pub struct PositionSmoother {
    x: MovingAverage<f64>,
    y: MovingAverage<f64>,
}

impl PositionSmoother {
    pub fn new(window: usize) -> Self {
        Self {
            x: MovingAverage::new(window),
            y: MovingAverage::new(window),
        }
    }

    /// Feed one accepted fix, returning the smoothed `(x, y)`
    pub fn update(&mut self, x: f64, y: f64) -> (f64, f64) {
        (self.x.update(x), self.y.update(y))
    }

    pub fn window(&self) -> usize {
        self.x.window()
    }

    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
    }
}

impl Default for PositionSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
