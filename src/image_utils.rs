use image::{GrayImage, Luma, RgbImage};
use ndarray::{Array2, Array3};

pub fn gray_to_array(image: &GrayImage) -> Array2<f32> {
    let (width, height) = image.dimensions();
    let mut arr = Array2::zeros((height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        arr[[y as usize, x as usize]] = pixel[0] as f32;
    }

    arr
}

/// Values are clamped to `[0, 255]` and truncated, not rounded.
pub fn array_to_gray(arr: &Array2<f32>) -> GrayImage {
    let (height, width) = arr.dim();
    let mut image = GrayImage::new(width as u32, height as u32);

    for y in 0..height {
        for x in 0..width {
            let value = arr[[y, x]].clamp(0.0, 255.0) as u8;
            image.put_pixel(x as u32, y as u32, Luma([value]));
        }
    }

    image
}

pub fn calculate_histogram(image: &GrayImage) -> [u32; 256] {
    let mut histogram = [0u32; 256];

    for pixel in image.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    histogram
}

/// 256 unit-width bins over `[0, 256)`. Values outside the range (and NaN)
/// are not counted, so the histogram total can be smaller than the pixel count.
pub fn mask_histogram(mask: &Array2<f32>) -> [u32; 256] {
    let mut histogram = [0u32; 256];

    for &value in mask.iter() {
        if (0.0..256.0).contains(&value) {
            histogram[value as usize] += 1;
        }
    }

    histogram
}

/// Maps a tile to the `3 x H x W` layout the segmentation network consumes,
/// scaled to `[-1, 1]`.
pub fn rgb_to_normalized_chw(tile: &RgbImage) -> Array3<f32> {
    let (width, height) = tile.dimensions();
    let mut tensor = Array3::zeros((3, height as usize, width as usize));

    for (x, y, pixel) in tile.enumerate_pixels() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            tensor[[c, y as usize, x as usize]] = (v - 0.5) / 0.5;
        }
    }

    tensor
}

// Source sample pairs and interpolation factor for each destination index,
// using pixel-center alignment with edge replication.
fn linear_taps(src_len: usize, dst_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = src_len as f64 / dst_len as f64;

    (0..dst_len)
        .map(|d| {
            let f = (d as f64 + 0.5) * scale - 0.5;
            let floor = f.floor();
            if floor < 0.0 {
                return (0, 0, 0.0);
            }
            let i0 = floor as usize;
            if i0 + 1 >= src_len {
                (src_len - 1, src_len - 1, 0.0)
            } else {
                (i0, i0 + 1, (f - floor) as f32)
            }
        })
        .collect()
}

fn nearest_taps(src_len: usize, dst_len: usize) -> Vec<usize> {
    let scale = src_len as f64 / dst_len as f64;

    (0..dst_len)
        .map(|d| ((d as f64 * scale).floor() as usize).min(src_len - 1))
        .collect()
}

pub fn resize_bilinear(src: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    if src.is_empty() {
        return Array2::zeros((height, width));
    }

    let (src_h, src_w) = src.dim();
    let rows = linear_taps(src_h, height);
    let cols = linear_taps(src_w, width);

    Array2::from_shape_fn((height, width), |(y, x)| {
        let (y0, y1, fy) = rows[y];
        let (x0, x1, fx) = cols[x];
        let top = src[[y0, x0]] * (1.0 - fx) + src[[y0, x1]] * fx;
        let bottom = src[[y1, x0]] * (1.0 - fx) + src[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}

pub fn resize_nearest(src: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    if src.is_empty() {
        return Array2::zeros((height, width));
    }

    let (src_h, src_w) = src.dim();
    let rows = nearest_taps(src_h, height);
    let cols = nearest_taps(src_w, width);

    Array2::from_shape_fn((height, width), |(y, x)| src[[rows[y], cols[x]]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::array;

    #[test]
    fn test_mask_histogram_skips_out_of_range() {
        let mask = array![[0.0, 0.9, 255.5], [256.0, -1.0, f32::NAN]];
        let hist = mask_histogram(&mask);
        assert_eq!(hist[0], 2);
        assert_eq!(hist[255], 1);
        assert_eq!(hist.iter().map(|&c| c as u64).sum::<u64>(), 3);
    }

    #[test]
    fn test_bilinear_identity_when_same_shape() {
        let src = array![[1.0, 2.0], [3.0, 4.0]];
        assert_eq!(resize_bilinear(&src, 2, 2), src);
    }

    #[test]
    fn test_bilinear_upsampled_spike_is_symmetric() {
        let spike = array![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        let up = resize_bilinear(&spike, 6, 6);

        // Per-axis profile is [0, 0.25, 0.75, 0.75, 0.25, 0].
        assert_eq!(up[[0, 0]], 0.0);
        assert!((up[[2, 2]] - 0.5625).abs() < 1e-6);
        assert!((up[[2, 3]] - 0.5625).abs() < 1e-6);
        for y in 0..6 {
            for x in 0..6 {
                assert!((up[[y, x]] - up[[5 - y, 5 - x]]).abs() < 1e-6);
            }
        }
        assert!((up[[1, 2]] - 0.1875).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_upsampling_replicates_blocks() {
        let spike = array![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        let up = resize_nearest(&spike, 6, 6);
        assert_eq!(up[[2, 2]], 1.0);
        assert_eq!(up[[3, 3]], 1.0);
        assert_eq!(up[[1, 2]], 0.0);
        assert_eq!(up[[4, 3]], 0.0);
    }

    #[test]
    fn test_normalized_chw_range() {
        let mut tile = RgbImage::new(2, 1);
        tile.put_pixel(0, 0, Rgb([0, 255, 0]));
        tile.put_pixel(1, 0, Rgb([255, 0, 255]));

        let tensor = rgb_to_normalized_chw(&tile);
        assert_eq!(tensor.dim(), (3, 1, 2));
        assert_eq!(tensor[[0, 0, 0]], -1.0);
        assert_eq!(tensor[[1, 0, 0]], 1.0);
        assert_eq!(tensor[[2, 0, 1]], 1.0);
    }

    #[test]
    fn test_array_to_gray_truncates() {
        let arr = array![[12.9, -3.0, 300.0]];
        let gray = array_to_gray(&arr);
        assert_eq!(gray.get_pixel(0, 0)[0], 12);
        assert_eq!(gray.get_pixel(1, 0)[0], 0);
        assert_eq!(gray.get_pixel(2, 0)[0], 255);
        assert_eq!(gray_to_array(&gray)[[0, 0]], 12.0);
    }
}
