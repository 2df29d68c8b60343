use num_complex::Complex64;
use rustfft::{num_traits::Zero, Fft, FftPlanner};

/// Helper that wraps the `rustfft` planner for reuse across traces of one size.
pub struct FftHelper {
    fft: std::sync::Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
    size: usize,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex64::zero(); fft.get_inplace_scratch_len()];
        Self { fft, scratch, size }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Forward transform of `input` zero-padded (or cut) to the planned size.
    pub fn forward<I>(&mut self, input: I) -> Vec<Complex64>
    where
        I: IntoIterator<Item = Complex64>,
    {
        let mut buffer: Vec<Complex64> = input.into_iter().take(self.size).collect();
        buffer.resize(self.size, Complex64::zero());
        self.fft.process_with_scratch(&mut buffer, &mut self.scratch);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fft_helper_pads_to_planned_length() {
        let mut helper = FftHelper::new(8);
        let input = [1.0, 0.0, -1.0, 0.0].map(|v| Complex64::new(v, 0.0));
        let output = helper.forward(input);
        assert_eq!(output.len(), 8);
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let mut helper = FftHelper::new(6);
        let output = helper.forward([Complex64::new(1.0, 0.0)]);
        for bin in output {
            assert!((bin - Complex64::new(1.0, 0.0)).norm() < 1e-12);
        }
    }
}
