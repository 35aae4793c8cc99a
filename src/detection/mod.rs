use image::GrayImage;
use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    Decision, Label,
    error::{ForensicsError, Result},
    image_utils::{calculate_histogram, mask_histogram},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    None,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 0.2 => ConfidenceLevel::None,
            s if s < 0.4 => ConfidenceLevel::Low,
            s if s < 0.6 => ConfidenceLevel::Medium,
            s if s < 0.8 => ConfidenceLevel::High,
            _ => ConfidenceLevel::VeryHigh,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Share of pixels that must sit in one extreme band for `Real`.
    pub threshold: f64,
    /// First bin of the bright band; the band runs to 255.
    pub high_band_start: usize,
    /// One past the last bin of the dark band, which starts at 0.
    pub low_band_end: usize,
    /// The fake-branch remap is not bounded; it reaches
    /// `(4t - 1) / (4t - 2)` for an empty band. Off by default so scores
    /// match the deployed service.
    pub clamp_confidence: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            high_band_start: 200,
            low_band_end: 50,
            clamp_confidence: false,
        }
    }
}

/// Real/fake decision from how much of a mask's intensity mass piles up at
/// either end of the 8-bit range. No learned parameters.
pub struct HistogramClassifier {
    config: ClassifierConfig,
}

impl HistogramClassifier {
    pub fn new() -> Self {
        Self {
            config: ClassifierConfig::default(),
        }
    }

    pub fn with_config(config: ClassifierConfig) -> Result<Self> {
        if !(config.threshold > 0.0 && config.threshold < 1.0) {
            return Err(ForensicsError::InvalidParameter(
                "Classifier threshold must lie strictly between 0 and 1".into(),
            ));
        }
        if (config.threshold - 0.5).abs() < f64::EPSILON {
            return Err(ForensicsError::InvalidParameter(
                "Classifier threshold of 0.5 makes the confidence remap undefined".into(),
            ));
        }
        if config.high_band_start > 256 || config.low_band_end > 256 {
            return Err(ForensicsError::InvalidParameter(
                "Histogram bands must lie within 0..256".into(),
            ));
        }

        Ok(Self { config })
    }

    /// Classifies a mask on the 0..255 intensity scale.
    pub fn classify(&self, mask: &Array2<f32>) -> Decision {
        self.classify_histogram(&mask_histogram(mask))
    }

    pub fn classify_gray(&self, mask: &GrayImage) -> Decision {
        self.classify_histogram(&calculate_histogram(mask))
    }

    pub fn classify_histogram(&self, histogram: &[u32; 256]) -> Decision {
        let band = |range: std::ops::Range<usize>| -> f64 {
            histogram[range].iter().map(|&c| c as f64).sum()
        };

        let total = band(0..256);
        let high = band(self.config.high_band_start..256);
        let low = band(0..self.config.low_band_end);
        let concentration = high.max(low);
        let threshold = self.config.threshold;

        // An empty histogram (nothing in range) counts as zero concentration.
        let ratio = if total > 0.0 {
            (concentration / total).min(1.0)
        } else {
            0.0
        };

        let (label, confidence) = if concentration > threshold * total {
            (Label::Real, ratio)
        } else {
            let slope = -1.0 / (2.0 * threshold - 1.0);
            let intercept = (4.0 * threshold - 1.0) / (4.0 * threshold - 2.0);
            let confidence = slope * ratio + intercept;
            let confidence = if self.config.clamp_confidence {
                confidence.clamp(0.0, 1.0)
            } else {
                confidence
            };
            (Label::Fake, confidence)
        };

        debug!(
            "Histogram decision: {:?} (concentration {:.4}, confidence {:.4})",
            label, ratio, confidence
        );

        Decision {
            label,
            confidence,
            concentration: ratio,
        }
    }
}

impl Default for HistogramClassifier {
    fn default() -> Self {
        Self::new()
    }
}
