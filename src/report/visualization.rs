use image::{GenericImage, GrayImage, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{
    LocalizationResult,
    error::{ForensicsError, Result},
    tiling::TileGrid,
};

#[derive(Debug, Clone, Copy)]
pub enum ColorScheme {
    HeatMap,
    Viridis,
    Grayscale,
    SingleColor(Rgb<u8>),
}

#[derive(Debug, Clone)]
pub struct VisualizationConfig {
    pub color_scheme: ColorScheme,
    pub overlay_opacity: f32,
    pub show_grid: bool,
    pub grid_color: Rgb<u8>,
    pub grid_thickness: u32,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            color_scheme: ColorScheme::HeatMap,
            overlay_opacity: 0.5,
            show_grid: false,
            grid_color: Rgb([255, 255, 255]),
            grid_thickness: 2,
        }
    }
}

pub struct Visualizer {
    config: VisualizationConfig,
}

impl Visualizer {
    pub fn new() -> Self {
        Self {
            config: VisualizationConfig::default(),
        }
    }

    pub fn with_config(config: VisualizationConfig) -> Self {
        Self { config }
    }

    pub fn create_heatmap(&self, gray: &GrayImage) -> RgbImage {
        let (width, height) = gray.dimensions();
        let mut heatmap = RgbImage::new(width, height);

        for (x, y, pixel) in gray.enumerate_pixels() {
            let intensity = pixel[0] as f32 / 255.0;
            heatmap.put_pixel(x, y, self.intensity_to_color(intensity));
        }

        heatmap
    }

    fn intensity_to_color(&self, intensity: f32) -> Rgb<u8> {
        let intensity = intensity.clamp(0.0, 1.0);

        match self.config.color_scheme {
            ColorScheme::HeatMap => {
                let (r, g, b) = if intensity < 0.25 {
                    let t = intensity / 0.25;
                    (0.0, t, 1.0)
                } else if intensity < 0.5 {
                    let t = (intensity - 0.25) / 0.25;
                    (0.0, 1.0, 1.0 - t)
                } else if intensity < 0.75 {
                    let t = (intensity - 0.5) / 0.25;
                    (t, 1.0, 0.0)
                } else {
                    let t = (intensity - 0.75) / 0.25;
                    (1.0, 1.0 - t, 0.0)
                };
                Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
            }
            ColorScheme::Viridis => {
                let r = 0.267004 + intensity * (0.993248 - 0.267004);
                let g = 0.004874 + intensity * (0.906157 - 0.004874);
                let b = 0.329415 + intensity * (0.143936 - 0.329415);
                Rgb([
                    (r.clamp(0.0, 1.0) * 255.0) as u8,
                    (g.clamp(0.0, 1.0) * 255.0) as u8,
                    (b.clamp(0.0, 1.0) * 255.0) as u8,
                ])
            }
            ColorScheme::Grayscale => {
                let v = (intensity * 255.0) as u8;
                Rgb([v, v, v])
            }
            ColorScheme::SingleColor(base) => Rgb([
                (base[0] as f32 * intensity) as u8,
                (base[1] as f32 * intensity) as u8,
                (base[2] as f32 * intensity) as u8,
            ]),
        }
    }

    pub fn overlay_heatmap(&self, original: &RgbImage, heatmap: &RgbImage) -> Result<RgbImage> {
        if original.dimensions() != heatmap.dimensions() {
            return Err(ForensicsError::ShapeMismatch(format!(
                "overlay of {:?} heatmap onto {:?} image",
                heatmap.dimensions(),
                original.dimensions()
            )));
        }

        let alpha = self.config.overlay_opacity;
        Ok(RgbImage::from_fn(original.width(), original.height(), |x, y| {
            let orig = original.get_pixel(x, y);
            let heat = heatmap.get_pixel(x, y);
            Rgb([
                ((1.0 - alpha) * orig[0] as f32 + alpha * heat[0] as f32) as u8,
                ((1.0 - alpha) * orig[1] as f32 + alpha * heat[1] as f32) as u8,
                ((1.0 - alpha) * orig[2] as f32 + alpha * heat[2] as f32) as u8,
            ])
        }))
    }

    /// Outlines every tile footprint, innermost ring on the tile boundary.
    pub fn draw_tile_grid(&self, image: &mut RgbImage, grid: &TileGrid) {
        let size = grid.tile_size();

        for region in grid.regions() {
            for t in 0..self.config.grid_thickness.min(size / 2) {
                let rect = Rect::at((region.x + t) as i32, (region.y + t) as i32)
                    .of_size(size - 2 * t, size - 2 * t);
                draw_hollow_rect_mut(image, rect, self.config.grid_color);
            }
        }
    }

    pub fn visualize_localization(
        &self,
        original: &RgbImage,
        result: &LocalizationResult,
    ) -> Result<RgbImage> {
        let heatmap = self.create_heatmap(&result.mask.to_gray_image());
        let mut vis = self.overlay_heatmap(original, &heatmap)?;

        if self.config.show_grid {
            self.draw_tile_grid(&mut vis, &result.grid);
        }

        Ok(vis)
    }

    /// Places images left to right on a black canvas as tall as the tallest.
    pub fn create_comparison(&self, images: &[&RgbImage]) -> Result<RgbImage> {
        let padding = 10u32;
        let width = images.iter().map(|i| i.width()).sum::<u32>()
            + padding * images.len().saturating_sub(1) as u32;
        let height = images.iter().map(|i| i.height()).max().unwrap_or(0);

        let mut canvas = RgbImage::new(width, height);
        let mut x_offset = 0;
        for image in images {
            canvas
                .copy_from(*image, x_offset, 0)
                .map_err(ForensicsError::ImageLoad)?;
            x_offset += image.width() + padding;
        }

        Ok(canvas)
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::Tiler;
    use image::Luma;

    #[test]
    fn test_heatmap_extremes() {
        let gray = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0 } else { 255 }]));
        let heatmap = Visualizer::new().create_heatmap(&gray);
        assert_eq!(heatmap.get_pixel(0, 0).0, [0, 0, 255]);
        assert_eq!(heatmap.get_pixel(1, 0).0, [255, 0, 0]);
    }

    #[test]
    fn test_overlay_requires_matching_size() {
        let vis = Visualizer::new();
        let a = RgbImage::new(4, 4);
        let b = RgbImage::new(5, 4);
        assert!(vis.overlay_heatmap(&a, &b).is_err());
    }

    #[test]
    fn test_overlay_mixes_by_opacity() {
        let vis = Visualizer::new();
        let original = RgbImage::from_pixel(2, 2, Rgb([100, 100, 100]));
        let heat = RgbImage::from_pixel(2, 2, Rgb([200, 0, 100]));
        let out = vis.overlay_heatmap(&original, &heat).unwrap();
        assert_eq!(out.get_pixel(1, 1).0, [150, 50, 100]);
    }

    #[test]
    fn test_tile_grid_outline() {
        let vis = Visualizer::with_config(VisualizationConfig {
            grid_thickness: 1,
            grid_color: Rgb([255, 0, 0]),
            ..VisualizationConfig::default()
        });
        let grid = Tiler::new(4).unwrap().grid(4, 6).unwrap();
        let mut image = RgbImage::new(6, 4);
        vis.draw_tile_grid(&mut image, &grid);

        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(5, 3).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(1, 1).0, [0, 0, 0]);
    }

    #[test]
    fn test_comparison_width() {
        let a = RgbImage::new(3, 2);
        let b = RgbImage::new(4, 5);
        let canvas = Visualizer::new().create_comparison(&[&a, &b]).unwrap();
        assert_eq!(canvas.dimensions(), (17, 5));
    }
}
