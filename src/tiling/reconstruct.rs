use image::{GrayImage, Luma, RgbImage};
use log::debug;
use ndarray::{Array2, ArrayView2, Zip, s};

use crate::{
    SRegion,
    error::{ForensicsError, Result},
    image_utils::array_to_gray,
    tiling::{
        TileGrid, TileOrigin,
        blend::{BlendKernel, KernelInterpolation},
    },
};

/// Running blend of tile predictions into a full-size mask.
///
/// A parallel `written` mask marks cells some tile has already reached, so
/// no value is reserved as a sentinel.
#[derive(Debug, Clone)]
pub struct MaskAccumulator {
    values: Array2<f32>,
    written: Array2<bool>,
    merged: usize,
}

impl MaskAccumulator {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            values: Array2::zeros((height, width)),
            written: Array2::from_elem((height, width), false),
            merged: 0,
        }
    }

    pub fn merged(&self) -> usize {
        self.merged
    }

    pub fn is_complete(&self) -> bool {
        self.written.iter().all(|&w| w)
    }

    pub fn unwritten(&self) -> usize {
        self.written.iter().filter(|&&w| !w).count()
    }

    /// Blends `tile` into `region`:
    /// `value = k * previous + (1 - k) * tile` where `k` is the kernel weight
    /// on cells written before and 0 on cells reached for the first time.
    pub fn blend(
        &mut self,
        region: SRegion,
        tile: ArrayView2<'_, f32>,
        kernel: &BlendKernel,
    ) -> Result<()> {
        let (height, width) = self.values.dim();
        let (x, y) = (region.x as usize, region.y as usize);
        let (h, w) = (region.height as usize, region.width as usize);

        if y + h > height || x + w > width {
            return Err(ForensicsError::ShapeMismatch(format!(
                "region {}x{} at ({}, {}) exceeds mask {}x{}",
                w, h, x, y, width, height
            )));
        }
        if tile.dim() != (h, w) {
            return Err(ForensicsError::ShapeMismatch(format!(
                "tile mask is {}x{} but its region is {}x{}",
                tile.ncols(),
                tile.nrows(),
                w,
                h
            )));
        }

        let weights = kernel.fitted(h, w);
        let values = self.values.slice_mut(s![y..y + h, x..x + w]);
        let written = self.written.slice_mut(s![y..y + h, x..x + w]);

        Zip::from(values)
            .and(written)
            .and(tile)
            .and(&*weights)
            .for_each(|value, seen, &incoming, &k| {
                let weight = if *seen { k } else { 0.0 };
                let previous = if *seen { *value } else { 0.0 };
                *value = weight * previous + (1.0 - weight) * incoming;
                *seen = true;
            });

        self.merged += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<ReconstructedMask> {
        let missing = self.unwritten();
        if missing > 0 {
            return Err(ForensicsError::ShapeMismatch(format!(
                "{} mask pixels were never covered by a tile",
                missing
            )));
        }

        Ok(ReconstructedMask {
            values: self.values,
            tile_count: self.merged,
        })
    }
}

/// Merges per-tile predictions in the grid's canonical order.
///
/// The blend is order-sensitive, so tiles must arrive in exactly the order
/// `TileGrid::origins` yields them.
pub struct Reconstructor {
    origins: Vec<TileOrigin>,
    size: u32,
    kernel: BlendKernel,
    accumulator: MaskAccumulator,
}

impl Reconstructor {
    pub fn new(grid: &TileGrid, interpolation: KernelInterpolation) -> Self {
        Self {
            origins: grid.origins().collect(),
            size: grid.tile_size(),
            kernel: BlendKernel::new(grid.tile_size(), interpolation),
            accumulator: MaskAccumulator::new(grid.height() as usize, grid.width() as usize),
        }
    }

    pub fn remaining(&self) -> usize {
        self.origins.len() - self.accumulator.merged()
    }

    pub fn push(&mut self, mask: ArrayView2<'_, f32>) -> Result<()> {
        let index = self.accumulator.merged();
        let origin = *self.origins.get(index).ok_or_else(|| {
            ForensicsError::ShapeMismatch(format!(
                "received more than the {} tile masks the grid defines",
                self.origins.len()
            ))
        })?;

        self.accumulator
            .blend(origin.region(self.size), mask, &self.kernel)
    }

    pub fn finish(self) -> Result<ReconstructedMask> {
        if self.remaining() > 0 {
            return Err(ForensicsError::ShapeMismatch(format!(
                "expected {} tile masks, got {}",
                self.origins.len(),
                self.accumulator.merged()
            )));
        }

        let mask = self.accumulator.finish()?;
        debug!(
            "Reconstructed {}x{} mask from {} tiles",
            mask.width(),
            mask.height(),
            mask.tile_count()
        );
        Ok(mask)
    }
}

/// Left fold of `masks` over `grid` in canonical order.
pub fn reconstruct(
    grid: &TileGrid,
    masks: &[Array2<f32>],
    interpolation: KernelInterpolation,
) -> Result<ReconstructedMask> {
    if masks.len() != grid.len() {
        return Err(ForensicsError::ShapeMismatch(format!(
            "grid has {} tiles but {} masks were supplied",
            grid.len(),
            masks.len()
        )));
    }

    masks
        .iter()
        .try_fold(Reconstructor::new(grid, interpolation), |mut acc, mask| {
            acc.push(mask.view())?;
            Ok::<_, ForensicsError>(acc)
        })?
        .finish()
}

/// Full-resolution forgery mask, every pixel covered.
///
/// The network emits a single channel, so one plane is stored; use
/// [`ReconstructedMask::to_rgb_image`] for the three-channel rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedMask {
    values: Array2<f32>,
    tile_count: usize,
}

impl ReconstructedMask {
    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn height(&self) -> u32 {
        self.values.nrows() as u32
    }

    pub fn width(&self) -> u32 {
        self.values.ncols() as u32
    }

    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    pub fn to_gray_image(&self) -> GrayImage {
        array_to_gray(&self.values)
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        let gray = self.to_gray_image();
        RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
            let Luma([v]) = *gray.get_pixel(x, y);
            image::Rgb([v, v, v])
        })
    }

    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        self.to_gray_image().save(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::Tiler;

    fn constant(size: u32, value: f32) -> Array2<f32> {
        Array2::from_elem((size as usize, size as usize), value)
    }

    #[test]
    fn test_single_tile_is_returned_unchanged() {
        let grid = Tiler::new(8).unwrap().grid(8, 8).unwrap();
        let tile = Array2::from_shape_fn((8, 8), |(y, x)| (y * 8 + x) as f32 * 1.7);

        let mask = reconstruct(&grid, &[tile.clone()], KernelInterpolation::Bilinear).unwrap();
        assert_eq!(mask.values(), &tile);
        assert_eq!(mask.tile_count(), 1);
    }

    #[test]
    fn test_every_pixel_written_for_ragged_images() {
        let tiler = Tiler::new(6).unwrap();
        for (height, width) in [(6, 6), (7, 13), (11, 6), (20, 17)] {
            let grid = tiler.grid(height, width).unwrap();
            let masks: Vec<_> = (0..grid.len()).map(|i| constant(6, i as f32)).collect();
            let mask = reconstruct(&grid, &masks, KernelInterpolation::Bilinear).unwrap();
            assert_eq!(mask.values().dim(), (height as usize, width as usize));
        }
    }

    #[test]
    fn test_overlap_blends_towards_new_tile_center() {
        let grid = Tiler::new(4).unwrap().grid(4, 6).unwrap();
        assert_eq!(grid.col_origins(), &[0, 2]);

        let masks = vec![constant(4, 0.0), constant(4, 100.0)];
        let mask = reconstruct(&grid, &masks, KernelInterpolation::Bilinear).unwrap();
        let v = mask.values();

        // Kernel profile for size 4 is [0, 0.625, 0.625, 0].
        assert_eq!(v[[1, 1]], 0.0);
        assert_eq!(v[[1, 5]], 100.0);
        assert_eq!(v[[1, 2]], 0.0);
        assert_eq!(v[[0, 3]], 0.0);
        assert!((v[[1, 3]] - 39.0625).abs() < 1e-4);
        assert!((v[[2, 3]] - 39.0625).abs() < 1e-4);
    }

    #[test]
    fn test_merge_order_matters() {
        let grid = Tiler::new(4).unwrap().grid(4, 6).unwrap();
        let kernel = BlendKernel::new(4, KernelInterpolation::Bilinear);
        let regions: Vec<SRegion> = grid.regions().collect();
        let masks = [constant(4, 0.0), constant(4, 100.0)];

        let mut forward = MaskAccumulator::new(4, 6);
        forward.blend(regions[0], masks[0].view(), &kernel).unwrap();
        forward.blend(regions[1], masks[1].view(), &kernel).unwrap();

        let mut backward = MaskAccumulator::new(4, 6);
        backward.blend(regions[1], masks[1].view(), &kernel).unwrap();
        backward.blend(regions[0], masks[0].view(), &kernel).unwrap();

        let forward = forward.finish().unwrap();
        let backward = backward.finish().unwrap();
        assert_ne!(forward.values(), backward.values());
        assert!((backward.values()[[1, 2]] - 60.9375).abs() < 1e-4);
    }

    #[test]
    fn test_reconstruction_is_deterministic() {
        let grid = Tiler::new(5).unwrap().grid(12, 9).unwrap();
        let masks: Vec<_> = (0..grid.len())
            .map(|i| Array2::from_shape_fn((5, 5), |(y, x)| ((i * 31 + y * 7 + x) % 256) as f32))
            .collect();

        let a = reconstruct(&grid, &masks, KernelInterpolation::Bilinear).unwrap();
        let b = reconstruct(&grid, &masks, KernelInterpolation::Bilinear).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_mask_count_mismatch() {
        let grid = Tiler::new(4).unwrap().grid(4, 6).unwrap();
        let result = reconstruct(&grid, &[constant(4, 1.0)], KernelInterpolation::Bilinear);
        assert!(matches!(result, Err(ForensicsError::ShapeMismatch(_))));

        let mut reconstructor = Reconstructor::new(&grid, KernelInterpolation::Bilinear);
        reconstructor.push(constant(4, 1.0).view()).unwrap();
        assert_eq!(reconstructor.remaining(), 1);
        assert!(reconstructor.finish().is_err());
    }

    #[test]
    fn test_extra_mask_rejected() {
        let grid = Tiler::new(4).unwrap().grid(4, 4).unwrap();
        let mut reconstructor = Reconstructor::new(&grid, KernelInterpolation::Nearest);
        reconstructor.push(constant(4, 1.0).view()).unwrap();
        assert!(reconstructor.push(constant(4, 1.0).view()).is_err());
    }

    #[test]
    fn test_tile_shape_mismatch() {
        let grid = Tiler::new(4).unwrap().grid(4, 4).unwrap();
        let result = reconstruct(&grid, &[constant(3, 1.0)], KernelInterpolation::Bilinear);
        assert!(matches!(result, Err(ForensicsError::ShapeMismatch(_))));
    }

    #[test]
    fn test_uncovered_pixels_fail_to_finish() {
        let kernel = BlendKernel::new(2, KernelInterpolation::Bilinear);
        let mut acc = MaskAccumulator::new(2, 4);
        let region = SRegion {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        };
        acc.blend(region, constant(2, 1.0).view(), &kernel).unwrap();
        assert!(!acc.is_complete());
        assert_eq!(acc.unwritten(), 4);
        assert!(acc.finish().is_err());
    }

    #[test]
    fn test_rgb_rendering_replicates_channel() {
        let grid = Tiler::new(2).unwrap().grid(2, 2).unwrap();
        let mask = reconstruct(&grid, &[constant(2, 200.7)], KernelInterpolation::Bilinear).unwrap();
        let rgb = mask.to_rgb_image();
        assert_eq!(rgb.get_pixel(1, 1).0, [200, 200, 200]);
    }
}
