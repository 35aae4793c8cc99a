use std::path::Path;

use image::{DynamicImage, RgbImage};
use log::{debug, info};
use ndarray::Array2;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::{
    detection::{ClassifierConfig, ConfidenceLevel, HistogramClassifier},
    error::{ForensicsError, Result},
    model::SegmentationModel,
    tiling::{
        DEFAULT_TILE_SIZE, TileGrid, TileOrigin, Tiler,
        blend::KernelInterpolation,
        reconstruct::{ReconstructedMask, Reconstructor},
    },
};

pub mod error;
pub mod image_utils;
pub mod model;
pub mod tiling;
pub mod detection;
pub mod analysis;
pub mod report;

/// Which mask the headline decision is drawn from.
///
/// The deployed service classified the raw prediction of the last tile it
/// processed rather than the reconstructed mosaic. Both decisions are always
/// computed; this only selects the one [`LocalizationResult::decision`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecisionScope {
    #[default]
    LastTile,
    ReconstructedMask,
}

#[derive(Debug, Clone)]
pub struct LocalizationConfig {
    pub tile_size: u32,
    /// Multiplier taking model probabilities onto the 0..255 mask scale.
    pub output_scale: f32,
    pub parallel: bool,
    pub interpolation: KernelInterpolation,
    pub decision_scope: DecisionScope,
    pub classifier: ClassifierConfig,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            output_scale: 255.0,
            parallel: true,
            interpolation: KernelInterpolation::Bilinear,
            decision_scope: DecisionScope::LastTile,
            classifier: ClassifierConfig::default(),
        }
    }
}

pub struct ForgeryLocalizer {
    original: RgbImage,
    config: LocalizationConfig,
    path: Option<String>,
}

impl ForgeryLocalizer {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let original = image::open(&path)?.to_rgb8();

        Ok(Self {
            original,
            config: LocalizationConfig::default(),
            path: Some(path_str),
        })
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            original: image.to_rgb8(),
            config: LocalizationConfig::default(),
            path: None,
        }
    }

    pub fn with_config(mut self, config: LocalizationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn image(&self) -> &RgbImage {
        &self.original
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn grid(&self) -> Result<TileGrid> {
        Tiler::new(self.config.tile_size)?.grid_for(&self.original)
    }

    /// Runs the model once per tile and hands the scaled masks to `sink` in
    /// grid order.
    ///
    /// Tiles are cropped on demand. Sequential runs hold one tile and one mask
    /// at a time; parallel runs hold one batch per worker thread, and each
    /// batch is drained into `sink` in order before the next one starts.
    pub fn for_each_tile_mask<M, F>(
        &self,
        grid: &TileGrid,
        model: &M,
        mut sink: F,
    ) -> Result<()>
    where
        M: SegmentationModel,
        F: FnMut(Array2<f32>) -> Result<()>,
    {
        grid.check_image(&self.original)?;

        let size = grid.tile_size() as usize;
        let scale = self.config.output_scale;

        let predict = |&(index, origin): &(usize, TileOrigin)| -> Result<Array2<f32>> {
            debug!(
                "{}: tile {} at ({}, {})",
                model.name(),
                index,
                origin.col,
                origin.row
            );
            let tile = grid.crop(&self.original, index, origin);
            let raw = model.predict(&tile.pixels)?;
            if raw.dim() != (size, size) {
                return Err(ForensicsError::ShapeMismatch(format!(
                    "model returned {:?} for a {}x{} tile",
                    raw.dim(),
                    size,
                    size
                )));
            }
            Ok(raw.mapv(|v| v * scale))
        };

        if !self.config.parallel {
            for origin in grid.origins().enumerate() {
                sink(predict(&origin)?)?;
            }
            return Ok(());
        }

        let origins: Vec<(usize, TileOrigin)> = grid.origins().enumerate().collect();
        let batch = rayon::current_num_threads().max(1);
        for chunk in origins.chunks(batch) {
            let masks: Vec<Array2<f32>> =
                chunk.par_iter().map(&predict).collect::<Result<_>>()?;
            for mask in masks {
                sink(mask)?;
            }
        }

        Ok(())
    }

    /// Collects every scaled tile mask in grid order.
    pub fn predict_tiles<M: SegmentationModel>(
        &self,
        grid: &TileGrid,
        model: &M,
    ) -> Result<Vec<Array2<f32>>> {
        let mut masks = Vec::with_capacity(grid.len());
        self.for_each_tile_mask(grid, model, |mask| {
            masks.push(mask);
            Ok(())
        })?;
        Ok(masks)
    }

    pub fn localize<M: SegmentationModel>(&self, model: &M) -> Result<LocalizationResult> {
        let grid = self.grid()?;
        let classifier = HistogramClassifier::with_config(self.config.classifier.clone())?;

        info!(
            "Localizing {} ({}x{}) with {} tiles of {}",
            self.path().unwrap_or("in-memory image"),
            grid.width(),
            grid.height(),
            grid.len(),
            grid.tile_size()
        );

        let mut reconstructor = Reconstructor::new(&grid, self.config.interpolation);
        let mut last_tile = None;
        self.for_each_tile_mask(&grid, model, |mask| {
            reconstructor.push(mask.view())?;
            last_tile = Some(mask);
            Ok(())
        })?;

        let mask = reconstructor.finish()?;
        let last_tile = last_tile.ok_or_else(|| {
            ForensicsError::AnalysisFailed("tile grid produced no tiles".into())
        })?;

        let mask_decision = classifier.classify(mask.values());
        let last_tile_decision = classifier.classify(&last_tile);

        let result = LocalizationResult {
            grid,
            mask,
            last_tile,
            mask_decision,
            last_tile_decision,
            scope: self.config.decision_scope,
            model: model.name().to_string(),
        };

        let decision = result.decision();
        info!(
            "Decision ({:?}): {:?} with confidence {:.4}",
            result.scope, decision.label, decision.confidence
        );

        Ok(result)
    }
}

/// One-call entry point: tiles `image` at `tile_size`, runs `model` on every
/// tile and returns the headline decision.
pub fn classify_image<M: SegmentationModel>(
    image: DynamicImage,
    tile_size: u32,
    model: &M,
) -> Result<Decision> {
    let config = LocalizationConfig {
        tile_size,
        ..LocalizationConfig::default()
    };
    let result = ForgeryLocalizer::from_image(image)
        .with_config(config)
        .localize(model)?;
    Ok(*result.decision())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Real,
    Fake,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub label: Label,
    /// Not clamped unless the classifier is configured to; see
    /// [`ClassifierConfig::clamp_confidence`].
    pub confidence: f64,
    /// Share of histogram mass in the dominant extreme band.
    pub concentration: f64,
}

impl Decision {
    pub fn is_fake(&self) -> bool {
        self.label == Label::Fake
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.confidence)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskMetrics {
    pub true_positives: u64,
    pub true_negatives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub iou: f64,
}

#[derive(Debug, Clone)]
pub struct LocalizationResult {
    pub grid: TileGrid,
    pub mask: ReconstructedMask,
    /// Scaled prediction of the final tile in grid order.
    pub last_tile: Array2<f32>,
    pub mask_decision: Decision,
    pub last_tile_decision: Decision,
    pub scope: DecisionScope,
    pub model: String,
}

impl LocalizationResult {
    pub fn decision(&self) -> &Decision {
        match self.scope {
            DecisionScope::LastTile => &self.last_tile_decision,
            DecisionScope::ReconstructedMask => &self.mask_decision,
        }
    }

    pub fn save_mask<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.mask.save(path)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(report::JsonReport::from(self).to_json()?)
    }
}
