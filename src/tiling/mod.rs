pub mod blend;
pub mod reconstruct;

use std::path::Path;

use image::{RgbImage, imageops};
use log::debug;

use crate::{
    SRegion,
    error::{ForensicsError, Result},
};

/// Edge length the segmentation network was trained on.
pub const DEFAULT_TILE_SIZE: u32 = 896;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileOrigin {
    pub row: u32,
    pub col: u32,
}

impl TileOrigin {
    pub fn region(&self, size: u32) -> SRegion {
        SRegion {
            x: self.col,
            y: self.row,
            width: size,
            height: size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tile {
    pub index: usize,
    pub origin: TileOrigin,
    pub pixels: RgbImage,
}

/// Ordered tile origins covering a `height x width` image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    height: u32,
    width: u32,
    size: u32,
    rows: Vec<u32>,
    cols: Vec<u32>,
}

impl TileGrid {
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn tile_size(&self) -> u32 {
        self.size
    }

    pub fn row_origins(&self) -> &[u32] {
        &self.rows
    }

    pub fn col_origins(&self) -> &[u32] {
        &self.cols
    }

    pub fn len(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn origins(&self) -> impl Iterator<Item = TileOrigin> + '_ {
        self.rows
            .iter()
            .flat_map(move |&row| self.cols.iter().map(move |&col| TileOrigin { row, col }))
    }

    pub fn regions(&self) -> impl Iterator<Item = SRegion> + '_ {
        self.origins().map(move |origin| origin.region(self.size))
    }

    pub fn last_origin(&self) -> Option<TileOrigin> {
        Some(TileOrigin {
            row: *self.rows.last()?,
            col: *self.cols.last()?,
        })
    }

    pub(crate) fn check_image(&self, image: &RgbImage) -> Result<()> {
        let (width, height) = image.dimensions();
        if width != self.width || height != self.height {
            return Err(ForensicsError::ShapeMismatch(format!(
                "grid was built for {}x{} but image is {}x{}",
                self.width, self.height, width, height
            )));
        }
        Ok(())
    }

    /// Cuts the image into the grid's tiles. No padding is ever needed since
    /// every tile lies inside the image.
    pub fn tiles<'a>(&'a self, image: &'a RgbImage) -> Result<impl Iterator<Item = Tile> + 'a> {
        self.check_image(image)?;

        Ok(self
            .origins()
            .enumerate()
            .map(move |(index, origin)| self.crop(image, index, origin)))
    }

    /// Copies out a single tile. The image must already match the grid.
    pub(crate) fn crop(&self, image: &RgbImage, index: usize, origin: TileOrigin) -> Tile {
        Tile {
            index,
            origin,
            pixels: imageops::crop_imm(image, origin.col, origin.row, self.size, self.size)
                .to_image(),
        }
    }

    /// Writes every tile as `<stem>_<index:03>.png` into `directory`.
    pub fn save_tiles<P: AsRef<Path>>(
        &self,
        image: &RgbImage,
        directory: P,
        stem: &str,
    ) -> Result<Vec<std::path::PathBuf>> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;

        let mut written = Vec::with_capacity(self.len());
        for tile in self.tiles(image)? {
            let path = directory.join(format!("{}_{:03}.png", stem, tile.index));
            tile.pixels.save(&path)?;
            written.push(path);
        }

        debug!("Saved {} tiles to {}", written.len(), directory.display());
        Ok(written)
    }
}

pub struct Tiler {
    size: u32,
}

impl Tiler {
    pub fn new(size: u32) -> Result<Self> {
        if size < 2 {
            return Err(ForensicsError::InvalidParameter(
                "Tile size must be at least 2".into(),
            ));
        }

        Ok(Self { size })
    }

    pub fn tile_size(&self) -> u32 {
        self.size
    }

    pub fn step(&self) -> u32 {
        self.size / 2
    }

    pub fn grid(&self, height: u32, width: u32) -> Result<TileGrid> {
        if height < self.size || width < self.size {
            return Err(ForensicsError::InvalidImageSize {
                height,
                width,
                tile_size: self.size,
            });
        }

        let grid = TileGrid {
            height,
            width,
            size: self.size,
            rows: self.axis_origins(height),
            cols: self.axis_origins(width),
        };

        debug!(
            "Tile grid for {}x{} at size {}: {} rows x {} cols",
            width,
            height,
            self.size,
            grid.rows.len(),
            grid.cols.len()
        );

        Ok(grid)
    }

    pub fn grid_for(&self, image: &RgbImage) -> Result<TileGrid> {
        self.grid(image.height(), image.width())
    }

    // Stepped sweep at half the tile size, then one tile pinned flush to the
    // far edge unless the sweep already ended there.
    fn axis_origins(&self, extent: u32) -> Vec<u32> {
        let step = self.step() as usize;
        let last = extent - self.size;

        let mut origins: Vec<u32> = (0..=last).step_by(step).collect();
        if origins.last() != Some(&last) {
            origins.push(last);
        }

        origins
    }
}
