use forgery_localization::{
    ForgeryLocalizer, LocalizationConfig,
    error::Result,
    image_utils::rgb_to_normalized_chw,
    report::{
        JsonReport,
        visualization::{VisualizationConfig, Visualizer},
    },
};
use image::RgbImage;
use ndarray::Array2;

// Stand-in for the segmentation network: scores each pixel by how far its
// normalized channels spread apart.
fn channel_spread(tile: &RgbImage) -> Result<Array2<f32>> {
    let tensor = rgb_to_normalized_chw(tile);
    let (_, height, width) = tensor.dim();

    Ok(Array2::from_shape_fn((height, width), |(y, x)| {
        let r = tensor[[0, y, x]];
        let g = tensor[[1, y, x]];
        let b = tensor[[2, y, x]];
        let spread = r.max(g).max(b) - r.min(g).min(b);
        (spread / 2.0).clamp(0.0, 1.0)
    }))
}

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "evidences/spliced.png".to_string());

    let localizer = ForgeryLocalizer::new(&path)?.with_config(LocalizationConfig {
        tile_size: 256,
        ..LocalizationConfig::default()
    });

    let result = localizer.localize(&channel_spread)?;
    let decision = result.decision();

    println!("Image: {}", path);
    println!("Tiles: {}", result.grid.len());
    println!("Label: {:?}", decision.label);
    println!("Confidence: {:.4}", decision.confidence);
    println!(
        "Mosaic decision: {:?} ({:.4})",
        result.mask_decision.label, result.mask_decision.confidence
    );

    std::fs::create_dir_all("output")?;
    result.save_mask("output/mask.png")?;

    let visualizer = Visualizer::with_config(VisualizationConfig {
        show_grid: true,
        ..VisualizationConfig::default()
    });
    visualizer
        .visualize_localization(localizer.image(), &result)?
        .save("output/mask_overlay.png")?;

    println!("{}", JsonReport::from(&result).to_json()?);

    Ok(())
}
