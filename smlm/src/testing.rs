//! Synthetic frames for tests.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One rendered emitter. `amplitude` is the peak height above background.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TestPeak {
    pub x: f64,
    pub y: f64,
    pub amplitude: f64,
    pub sd: f64,
}

impl TestPeak {
    pub fn new(x: f64, y: f64, amplitude: f64, sd: f64) -> Self {
        Self {
            x,
            y,
            amplitude,
            sd,
        }
    }

    /// Integrated signal of the peak.
    pub fn signal(&self) -> f64 {
        self.amplitude * 2.0 * PI * self.sd * self.sd
    }
}

/// Render circular Gaussians evaluated at integer pixel coordinates.
pub(crate) fn render_gaussians(
    width: usize,
    height: usize,
    background: f64,
    peaks: &[TestPeak],
) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let mut value = background;
            for p in peaks {
                let dx = x as f64 - p.x;
                let dy = y as f64 - p.y;
                value += p.amplitude * (-(dx * dx + dy * dy) / (2.0 * p.sd * p.sd)).exp();
            }
            data.push(value as f32);
        }
    }
    data
}

/// Add zero-mean Gaussian noise from a seeded generator.
pub(crate) fn add_gaussian_noise(data: &mut [f32], sigma: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for v in data.iter_mut() {
        *v += (sigma * standard_normal(&mut rng)) as f32;
    }
}

/// Box-Muller transform.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
