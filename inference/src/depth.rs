//! Distance estimation from a co-registered depth plane

use crate::types::{DepthPlane, Distance, NormalizedBox};

/// Grid divisions along each axis; the interior points are sampled
const GRID_DIVISIONS: usize = 4;

/// Samples a fixed 3x3 grid inside a box and picks a robust depth
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthSampler;

impl DepthSampler {
    pub fn new() -> Self {
        Self
    }

    /// Distance for the box spanning `xmin..xmax`, `ymin..ymax` (normalized).
    ///
    /// Only normal floats count as samples. The second-smallest sample is
    /// returned so a single stray near reading does not win.
    pub fn estimate(
        &self,
        xmin: f32,
        xmax: f32,
        ymin: f32,
        ymax: f32,
        plane: Option<&DepthPlane>,
    ) -> Distance {
        let Some(plane) = plane else {
            return Distance::Undefined;
        };
        let mut samples = Self::sample_grid(xmin, xmax, ymin, ymax, plane);
        samples.retain(|d| d.is_normal());
        Self::pick(samples)
    }

    /// Same as [`estimate`](Self::estimate) for a normalized box
    pub fn estimate_box(&self, bbox: &NormalizedBox, plane: Option<&DepthPlane>) -> Distance {
        self.estimate(bbox.xmin(), bbox.xmax(), bbox.ymin(), bbox.ymax(), plane)
    }

    /// Raw samples at the interior grid points, row by row
    pub fn sample_grid(
        xmin: f32,
        xmax: f32,
        ymin: f32,
        ymax: f32,
        plane: &DepthPlane,
    ) -> Vec<f32> {
        let (width, height) = (plane.width(), plane.height());
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let step_x = (xmax - xmin) / GRID_DIVISIONS as f32;
        let step_y = (ymax - ymin) / GRID_DIVISIONS as f32;
        let mut samples = Vec::with_capacity((GRID_DIVISIONS - 1) * (GRID_DIVISIONS - 1));

        for i in 1..GRID_DIVISIONS {
            let y = ymin + i as f32 * step_y;
            let row = Self::clamp_index(y * height as f32, height);
            for j in 1..GRID_DIVISIONS {
                let x = xmin + j as f32 * step_x;
                let col = Self::clamp_index(x * width as f32, width);
                if let Some(d) = plane.get(row, col) {
                    samples.push(d);
                }
            }
        }

        samples
    }

    /// Second-smallest of the valid samples, the only one, or nothing
    fn pick(mut samples: Vec<f32>) -> Distance {
        samples.sort_by(f32::total_cmp);
        match samples.as_slice() {
            [] => Distance::Undefined,
            [only] => Distance::Meters(*only),
            [_, second, ..] => Distance::Meters(*second),
        }
    }

    fn clamp_index(pos: f32, len: u32) -> usize {
        if pos.is_nan() || pos <= 0.0 {
            0
        } else {
            (pos as usize).min(len as usize - 1)
        }
    }
}
