use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForensicsError {
    #[error("Image loading error: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Image {width}x{height} is smaller than the tile size {tile_size}x{tile_size}")]
    InvalidImageSize {
        height: u32,
        width: u32,
        tile_size: u32,
    },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Segmentation model failed: {0}")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForensicsError {
    pub fn inference<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ForensicsError::Inference(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ForensicsError>;
