use image::RgbImage;
use ndarray::Array2;
use parking_lot::Mutex;

use crate::error::Result;

/// The segmentation network the tiling pipeline drives.
///
/// `predict` receives one `size x size` RGB tile and must return a
/// `size x size` array of forgery probabilities, nominally in `[0, 1]`.
/// Implementations are called from several threads at once when tile
/// inference runs in parallel.
///
/// The pipeline never interrupts a call. Adapters that need a per-tile
/// deadline enforce it themselves and report an overrun as `Err`, which
/// aborts the run. See [`ForensicsError::inference`].
///
/// [`ForensicsError::inference`]: crate::error::ForensicsError::inference
pub trait SegmentationModel: Sync {
    fn predict(&self, tile: &RgbImage) -> Result<Array2<f32>>;

    fn name(&self) -> &str {
        "segmentation-model"
    }
}

impl<F> SegmentationModel for F
where
    F: Fn(&RgbImage) -> Result<Array2<f32>> + Sync,
{
    fn predict(&self, tile: &RgbImage) -> Result<Array2<f32>> {
        self(tile)
    }
}

/// Adapts a model that needs `&mut self` per call (an inference session with
/// scratch buffers, for example). Calls are serialized through a mutex.
pub struct ExclusiveModel<M> {
    inner: Mutex<M>,
    name: String,
}

impl<M> ExclusiveModel<M>
where
    M: FnMut(&RgbImage) -> Result<Array2<f32>> + Send,
{
    pub fn new(model: M) -> Self {
        Self {
            inner: Mutex::new(model),
            name: "exclusive-model".into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn into_inner(self) -> M {
        self.inner.into_inner()
    }
}

impl<M> SegmentationModel for ExclusiveModel<M>
where
    M: FnMut(&RgbImage) -> Result<Array2<f32>> + Send,
{
    fn predict(&self, tile: &RgbImage) -> Result<Array2<f32>> {
        let mut model = self.inner.lock();
        (*model)(tile)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
