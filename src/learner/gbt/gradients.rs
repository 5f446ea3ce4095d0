//! Gradient and hessian buffers.
//!
//! Column-major (channel-major) storage: channel `k`'s values for all rows
//! are contiguous, so tree growing reads one channel as a plain slice.
//!
//! ```text
//! grads: [r0_k0, r1_k0, ..., rN_k0, r0_k1, r1_k1, ...]
//! hess:  same layout
//! ```

/// Per-example gradients and hessians for every gradient channel of a loss.
#[derive(Debug, Clone)]
pub struct GradientBuffer {
    grads: Vec<f32>,
    hess: Vec<f32>,
    n_rows: usize,
    dimension: usize,
}

impl GradientBuffer {
    pub fn new(n_rows: usize, dimension: usize) -> Self {
        assert!(n_rows > 0, "n_rows must be positive");
        assert!(dimension > 0, "dimension must be positive");
        Self {
            grads: vec![0.0; n_rows * dimension],
            hess: vec![0.0; n_rows * dimension],
            n_rows,
            dimension,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn range(&self, channel: usize) -> std::ops::Range<usize> {
        debug_assert!(channel < self.dimension);
        channel * self.n_rows..(channel + 1) * self.n_rows
    }

    pub fn grad(&self, channel: usize) -> &[f32] {
        &self.grads[self.range(channel)]
    }

    pub fn hess(&self, channel: usize) -> &[f32] {
        &self.hess[self.range(channel)]
    }

    pub fn grad_mut(&mut self, channel: usize) -> &mut [f32] {
        let range = self.range(channel);
        &mut self.grads[range]
    }

    /// Mutable gradient and hessian slices of one channel.
    pub fn channel_mut(&mut self, channel: usize) -> (&mut [f32], &mut [f32]) {
        let range = self.range(channel);
        (&mut self.grads[range.clone()], &mut self.hess[range])
    }

    /// Scale one example's gradient and hessian across all channels, used by
    /// sampling schemes that re-weight kept examples.
    pub fn scale_example(&mut self, example: usize, factor: f32) {
        for channel in 0..self.dimension {
            let at = channel * self.n_rows + example;
            self.grads[at] *= factor;
            self.hess[at] *= factor;
        }
    }

    /// Absolute gradient of an example, summed over channels. Used by
    /// gradient-based sampling.
    pub fn abs_gradient(&self, example: usize) -> f32 {
        (0..self.dimension)
            .map(|channel| self.grads[channel * self.n_rows + example].abs())
            .sum()
    }
}
