use ndarray::{Array2, array};
use serde::{Deserialize, Serialize};

use crate::image_utils::{resize_bilinear, resize_nearest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KernelInterpolation {
    /// Smooth ramp from the tile border to its center.
    #[default]
    Bilinear,
    /// Hard step: the central third of the tile owns its pixels outright.
    Nearest,
}

impl KernelInterpolation {
    fn resize(&self, src: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
        match self {
            KernelInterpolation::Bilinear => resize_bilinear(src, height, width),
            KernelInterpolation::Nearest => resize_nearest(src, height, width),
        }
    }
}

/// Per-pixel share kept by whatever an earlier tile already wrote.
///
/// Built by upsampling a 3x3 center spike to the tile size and inverting it,
/// so weights are 1 along the tile border and fall to their minimum at the
/// center. A new tile therefore owns its central pixels and defers to the
/// previous writer near its own edges.
#[derive(Debug, Clone)]
pub struct BlendKernel {
    weights: Array2<f32>,
    interpolation: KernelInterpolation,
}

impl BlendKernel {
    pub fn new(size: u32, interpolation: KernelInterpolation) -> Self {
        let spike = array![[0.0f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        let size = size as usize;
        let weights = interpolation.resize(&spike, size, size).mapv(|v| 1.0 - v);

        Self {
            weights,
            interpolation,
        }
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    /// The kernel fitted to a `height x width` target region. Borrows when the
    /// shape already matches, which is the case for every square tile.
    pub fn fitted(&self, height: usize, width: usize) -> std::borrow::Cow<'_, Array2<f32>> {
        if self.weights.dim() == (height, width) {
            std::borrow::Cow::Borrowed(&self.weights)
        } else {
            std::borrow::Cow::Owned(self.interpolation.resize(&self.weights, height, width))
        }
    }
}
