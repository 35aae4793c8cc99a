pub mod visualization;

use serde::Serialize;

use crate::{Decision, DecisionScope, Label, LocalizationResult, detection::ConfidenceLevel};

#[derive(Serialize)]
pub struct JsonReport {
    pub model: String,
    pub image_width: u32,
    pub image_height: u32,
    pub tile_size: u32,
    pub tile_count: usize,
    pub decision: DecisionReportSection,
    pub mask_decision: DecisionReportSection,
    pub last_tile_decision: DecisionReportSection,
    pub mask: MaskReportSection,
}

#[derive(Serialize)]
pub struct DecisionReportSection {
    pub label: Label,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub concentration: f64,
}

#[derive(Serialize)]
pub struct MaskReportSection {
    pub scope: DecisionScope,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    /// Share of pixels above the 127 binarization cut.
    pub suspicious_fraction: f64,
}

impl From<&Decision> for DecisionReportSection {
    fn from(decision: &Decision) -> Self {
        Self {
            label: decision.label,
            confidence: decision.confidence,
            confidence_level: decision.confidence_level(),
            concentration: decision.concentration,
        }
    }
}

impl From<&LocalizationResult> for JsonReport {
    fn from(result: &LocalizationResult) -> Self {
        let values = result.mask.values();
        let pixels = values.len().max(1) as f64;

        Self {
            model: result.model.clone(),
            image_width: result.grid.width(),
            image_height: result.grid.height(),
            tile_size: result.grid.tile_size(),
            tile_count: result.grid.len(),
            decision: result.decision().into(),
            mask_decision: (&result.mask_decision).into(),
            last_tile_decision: (&result.last_tile_decision).into(),
            mask: MaskReportSection {
                scope: result.scope,
                min: values.iter().copied().fold(f32::INFINITY, f32::min),
                max: values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
                mean: values.mean().unwrap_or(0.0),
                suspicious_fraction: values.iter().filter(|&&v| v > 127.0).count() as f64
                    / pixels,
            },
        }
    }
}

impl JsonReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
