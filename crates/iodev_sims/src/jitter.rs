use rand::{rngs::StdRng, Rng, SeedableRng};

///Random walk with a bounded step, clamped to a range.
pub struct Jitter {
    rng: StdRng,
    amplitude: f64,
    min: f64,
    max: f64,
}

impl Jitter {
    pub fn new(amplitude: f64, min: f64, max: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), amplitude, min, max)
    }

    ///Reproducible sequence, for tests.
    pub fn seeded(seed: u64, amplitude: f64, min: f64, max: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), amplitude, min, max)
    }

    fn with_rng(rng: StdRng, amplitude: f64, min: f64, max: f64) -> Self {
        Self {
            rng,
            amplitude: amplitude.abs(),
            min: min.min(max),
            max: max.max(min),
        }
    }

    pub fn walk(&mut self, curr: f64) -> f64 {
        let step = if self.amplitude > 0.0 {
            self.rng.gen_range(-self.amplitude..=self.amplitude)
        } else {
            0.0
        };
        (curr + step).clamp(self.min, self.max)
    }
}

///Steps by `step` every call, wrapping back to `min` past `max`.
pub fn ramp(step: f64, min: f64, max: f64) -> impl FnMut(&f64) -> f64 + Send + 'static {
    move |curr| {
        let next = curr + step;
        if next > max {
            min
        } else {
            next
        }
    }
}
