//! Temporal smoothing of raw detector output over the last N frames

use crate::error::{DetectionError, Result};
use ndarray::{Array1, Array2, Axis};

/// Sliding window of the last `window` raw output vectors
pub struct TemporalAverager {
    /// One row per remembered frame, starts zeroed
    history: Array2<f32>,
    /// Row the next recorded output goes into
    index: usize,
}

impl TemporalAverager {
    pub fn new(window: usize, output_len: usize) -> Result<Self> {
        if window == 0 {
            return Err(DetectionError::config("averaging window must be at least 1"));
        }
        log::debug!(
            "Temporal averager: window {} over {} outputs",
            window,
            output_len
        );
        Ok(Self {
            history: Array2::zeros((window, output_len)),
            index: 0,
        })
    }

    pub fn window(&self) -> usize {
        self.history.nrows()
    }

    pub fn output_len(&self) -> usize {
        self.history.ncols()
    }

    /// Store the newest raw output, overwriting the oldest one
    pub fn record(&mut self, raw: &[f32]) -> Result<()> {
        if raw.len() != self.output_len() {
            return Err(DetectionError::InvalidDimensions {
                expected: vec![self.output_len()],
                actual: vec![raw.len()],
            });
        }

        self.history
            .row_mut(self.index)
            .assign(&ndarray::ArrayView1::from(raw));
        self.index = (self.index + 1) % self.window();
        Ok(())
    }

    /// Element-wise sum of every row divided by the window size.
    ///
    /// Rows that were never recorded stay zero, so during warm-up the average
    /// is pulled towards zero.
    pub fn average(&self) -> Vec<f32> {
        let sum: Array1<f32> = self.history.sum_axis(Axis(0));
        let scale = 1.0 / self.window() as f32;
        sum.iter().map(|v| v * scale).collect()
    }

    /// Record and return the new average in one step
    pub fn smooth(&mut self, raw: &[f32]) -> Result<Vec<f32>> {
        self.record(raw)?;
        Ok(self.average())
    }

    /// Forget all history
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.index = 0;
    }
}
