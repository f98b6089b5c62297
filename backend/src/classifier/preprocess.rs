//! Deterministic enhancement chain turning a decoded pixel buffer into the
//! fixed-size normalized tensor the classifier consumes.
//!
//! Chain order: resize, BGR to RGB, scale to [0,1], brightness shift,
//! contrast stretch around the channel mean, clip, adaptive histogram
//! equalization of the HSV value channel, saturation boost, final clip.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array2, Array3, Axis};
use std::path::Path;

use crate::classifier::config::PreprocessConfig;
use crate::error::ClassifierError;

const CLAHE_BINS: usize = 256;

/// Pixel buffer of shape (height, width, 3) with channels in BGR order, as
/// handed over by [`decode_image`].
#[derive(Debug)]
pub struct DecodedImage {
    pixels: Array3<u8>,
}

impl DecodedImage {
    pub fn from_bgr_pixels(pixels: Array3<u8>) -> Self {
        Self { pixels }
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }
}

/// Decodes an image file into a BGR pixel buffer. Format detection sniffs
/// the file content, so a mislabeled extension still decodes.
pub fn decode_image(path: &Path) -> Result<DecodedImage, ClassifierError> {
    let reader = image::ImageReader::open(path).map_err(|e| {
        ClassifierError::ImageDecode(format!("cannot read image from {}: {e}", path.display()))
    })?;
    let decoded = reader
        .with_guessed_format()
        .map_err(|e| {
            ClassifierError::ImageDecode(format!("cannot read image from {}: {e}", path.display()))
        })?
        .decode()
        .map_err(|e| {
            ClassifierError::ImageDecode(format!("cannot decode image {}: {e}", path.display()))
        })?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(ClassifierError::ImageDecode(format!(
            "image {} has zero-sized dimensions",
            path.display()
        )));
    }
    let pixels = Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        rgb.get_pixel(x as u32, y as u32)[2 - c]
    });
    Ok(DecodedImage { pixels })
}

#[derive(Debug)]
pub struct ImagePreprocessor {
    config: PreprocessConfig,
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Produces a (target_height, target_width, 3) float tensor with all
    /// values in [0,1]. Pure: the same pixel buffer always yields the same
    /// tensor.
    pub fn preprocess(&self, image: &DecodedImage) -> Result<Array3<f32>, ClassifierError> {
        let (height, width, channels) = image.pixels.dim();
        if channels != 3 || height == 0 || width == 0 {
            return Err(ClassifierError::ImageDecode(format!(
                "expected a h x w x 3 pixel buffer, got {height} x {width} x {channels}"
            )));
        }

        let target_w = self.config.target_width;
        let target_h = self.config.target_height;

        // Resampling is per-channel, so the BGR buffer rides through an
        // RgbImage container untouched.
        let raw: Vec<u8> = image.pixels.iter().copied().collect();
        let buffer = RgbImage::from_raw(width as u32, height as u32, raw).ok_or_else(|| {
            ClassifierError::ImageDecode("pixel buffer does not match its dimensions".to_string())
        })?;
        let resized = imageops::resize(&buffer, target_w, target_h, FilterType::Triangle);

        let (th, tw) = (target_h as usize, target_w as usize);
        let mut rgb = Array3::from_shape_fn((th, tw, 3), |(y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[2 - c] as f32 / 255.0
        });

        rgb += self.config.brightness_delta;
        for channel in 0..3 {
            let mut plane = rgb.index_axis_mut(Axis(2), channel);
            let mean = plane.mean().unwrap_or(0.0);
            plane.mapv_inplace(|v| (v - mean) * self.config.contrast_factor + mean);
        }
        clip_unit(&mut rgb);

        let mut hsv = rgb_to_hsv(&rgb);
        let value = hsv.index_axis(Axis(2), 2).to_owned();
        let equalized = equalize_adapthist(
            &value,
            self.config.clahe_grid_size,
            self.config.clahe_clip_limit,
        );
        hsv.index_axis_mut(Axis(2), 2).assign(&equalized);
        let rgb = hsv_to_rgb(&hsv);

        let mut hsv = rgb_to_hsv(&rgb);
        let boost = self.config.saturation_boost;
        hsv.index_axis_mut(Axis(2), 1)
            .mapv_inplace(|s| (s * boost).clamp(0.0, 1.0));
        let mut rgb = hsv_to_rgb(&hsv);

        clip_unit(&mut rgb);
        Ok(rgb)
    }
}

fn clip_unit(values: &mut Array3<f32>) {
    values.mapv_inplace(|v| v.clamp(0.0, 1.0));
}

fn rgb_to_hsv(rgb: &Array3<f32>) -> Array3<f32> {
    let (height, width, _) = rgb.dim();
    let mut out = Array3::zeros((height, width, 3));
    for y in 0..height {
        for x in 0..width {
            let (h, s, v) = pixel_rgb_to_hsv(rgb[[y, x, 0]], rgb[[y, x, 1]], rgb[[y, x, 2]]);
            out[[y, x, 0]] = h;
            out[[y, x, 1]] = s;
            out[[y, x, 2]] = v;
        }
    }
    out
}

fn hsv_to_rgb(hsv: &Array3<f32>) -> Array3<f32> {
    let (height, width, _) = hsv.dim();
    let mut out = Array3::zeros((height, width, 3));
    for y in 0..height {
        for x in 0..width {
            let (r, g, b) = pixel_hsv_to_rgb(hsv[[y, x, 0]], hsv[[y, x, 1]], hsv[[y, x, 2]]);
            out[[y, x, 0]] = r;
            out[[y, x, 1]] = g;
            out[[y, x, 2]] = b;
        }
    }
    out
}

/// Hue is expressed as a fraction of a turn in [0,1).
fn pixel_rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    (h, s, v)
}

fn pixel_hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    if s <= 0.0 {
        return (v, v, v);
    }
    let h6 = (h * 6.0).rem_euclid(6.0);
    let sector = (h6.floor() as usize) % 6;
    let f = h6 - h6.floor();
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

/// Contrast-limited adaptive histogram equalization over a single channel in
/// [0,1]. Tiles get individual clipped-histogram CDF lookup tables, blended
/// bilinearly per pixel. Degenerate single-bin tiles fall back to an
/// identity mapping.
fn equalize_adapthist(channel: &Array2<f32>, grid_size: usize, clip_limit: f32) -> Array2<f32> {
    let (height, width) = channel.dim();
    let grid = grid_size.clamp(1, height.min(width).max(1));
    let tile_h = height.div_ceil(grid);
    let tile_w = width.div_ceil(grid);

    let mut luts = Vec::with_capacity(grid * grid);
    for ty in 0..grid {
        for tx in 0..grid {
            let y0 = ty * tile_h;
            let y1 = ((ty + 1) * tile_h).min(height);
            let x0 = tx * tile_w;
            let x1 = ((tx + 1) * tile_w).min(width);
            let mut hist = [0f32; CLAHE_BINS];
            let mut count = 0usize;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[bin_of(channel[[y, x]])] += 1.0;
                    count += 1;
                }
            }
            luts.push(tile_lut(&mut hist, count, clip_limit));
        }
    }

    let mut out = Array2::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let bin = bin_of(channel[[y, x]]);
            let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let (ty0, ty1, wy) = split_tile_coord(fy, grid);
            let (tx0, tx1, wx) = split_tile_coord(fx, grid);
            let top = luts[ty0 * grid + tx0][bin] * (1.0 - wx) + luts[ty0 * grid + tx1][bin] * wx;
            let bottom =
                luts[ty1 * grid + tx0][bin] * (1.0 - wx) + luts[ty1 * grid + tx1][bin] * wx;
            out[[y, x]] = (top * (1.0 - wy) + bottom * wy).clamp(0.0, 1.0);
        }
    }
    out
}

fn split_tile_coord(f: f32, grid: usize) -> (usize, usize, f32) {
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    let last = (grid - 1) as f32;
    if f >= last {
        return (grid - 1, grid - 1, 0.0);
    }
    let lower = f.floor();
    (lower as usize, lower as usize + 1, f - lower)
}

fn bin_of(v: f32) -> usize {
    ((v.clamp(0.0, 1.0) * (CLAHE_BINS - 1) as f32).round() as usize).min(CLAHE_BINS - 1)
}

fn tile_lut(hist: &mut [f32; CLAHE_BINS], count: usize, clip_limit: f32) -> Vec<f32> {
    let identity =
        || (0..CLAHE_BINS).map(|i| i as f32 / (CLAHE_BINS - 1) as f32).collect::<Vec<f32>>();
    if count == 0 {
        return identity();
    }

    // Clipped mass is redistributed evenly across all bins.
    let limit = (clip_limit * count as f32).max(1.0);
    let mut excess = 0.0;
    for h in hist.iter_mut() {
        if *h > limit {
            excess += *h - limit;
            *h = limit;
        }
    }
    let spread = excess / CLAHE_BINS as f32;

    let total = count as f32;
    let mut cdf = 0.0;
    let mut cdf_min = None;
    let mut lut = vec![0f32; CLAHE_BINS];
    for (i, h) in hist.iter().enumerate() {
        let mass = *h + spread;
        cdf += mass;
        if cdf_min.is_none() && mass > 0.0 {
            cdf_min = Some(cdf);
        }
        lut[i] = cdf;
    }
    let cdf_min = cdf_min.unwrap_or(0.0);
    let denom = total - cdf_min;
    if denom <= f32::EPSILON {
        return identity();
    }
    for slot in lut.iter_mut() {
        *slot = ((*slot - cdf_min) / denom).clamp(0.0, 1.0);
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn preprocessor() -> ImagePreprocessor {
        ImagePreprocessor::new(PreprocessConfig::default())
    }

    fn gradient_image(height: usize, width: usize) -> DecodedImage {
        DecodedImage::from_bgr_pixels(Array3::from_shape_fn(
            (height, width, 3),
            |(y, x, c)| ((x * 7 + y * 13 + c * 31) % 256) as u8,
        ))
    }

    #[test]
    fn output_shape_and_range_for_any_input_size() {
        for (h, w) in [(100, 100), (37, 215), (640, 480), (1, 1)] {
            let tensor = preprocessor().preprocess(&gradient_image(h, w)).unwrap();
            assert_eq!(tensor.dim(), (224, 224, 3));
            assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let image = gradient_image(90, 120);
        let first = preprocessor().preprocess(&image).unwrap();
        let second = preprocessor().preprocess(&image).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn degenerate_images_do_not_error() {
        for fill in [0u8, 255u8] {
            let image = DecodedImage::from_bgr_pixels(Array3::from_elem((64, 64, 3), fill));
            let tensor = preprocessor().preprocess(&image).unwrap();
            assert_eq!(tensor.dim(), (224, 224, 3));
            assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn rejects_non_three_channel_buffers() {
        let image = DecodedImage::from_bgr_pixels(Array3::zeros((16, 16, 1)));
        let err = preprocessor().preprocess(&image).unwrap_err();
        assert!(matches!(err, ClassifierError::ImageDecode(_)));
    }

    #[test]
    fn rejects_empty_buffers() {
        let image = DecodedImage::from_bgr_pixels(Array3::zeros((0, 16, 3)));
        let err = preprocessor().preprocess(&image).unwrap_err();
        assert!(matches!(err, ClassifierError::ImageDecode(_)));
    }

    #[test]
    fn hsv_round_trip_is_stable() {
        for (r, g, b) in [
            (0.0, 0.0, 0.0),
            (1.0, 1.0, 1.0),
            (0.8, 0.2, 0.1),
            (0.1, 0.9, 0.4),
            (0.25, 0.25, 0.75),
        ] {
            let (h, s, v) = pixel_rgb_to_hsv(r, g, b);
            let (r2, g2, b2) = pixel_hsv_to_rgb(h, s, v);
            assert!((r - r2).abs() < 1e-6, "r {r} -> {r2}");
            assert!((g - g2).abs() < 1e-6, "g {g} -> {g2}");
            assert!((b - b2).abs() < 1e-6, "b {b} -> {b2}");
        }
    }

    #[test]
    fn clahe_is_shape_preserving_and_bounded() {
        let channel = Array2::from_shape_fn((224, 224), |(y, x)| ((x + y) % 97) as f32 / 96.0);
        let equalized = equalize_adapthist(&channel, 8, 0.01);
        assert_eq!(equalized.dim(), (224, 224));
        assert!(equalized.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn clahe_tolerates_constant_channels() {
        for fill in [0.0f32, 0.5, 1.0] {
            let channel = Array2::from_elem((224, 224), fill);
            let equalized = equalize_adapthist(&channel, 8, 0.01);
            assert!(equalized.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn decode_produces_bgr_pixel_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        let mut img = RgbImage::new(2, 2);
        for pixel in img.pixels_mut() {
            *pixel = Rgb([255, 0, 0]);
        }
        img.save(&path).unwrap();

        let decoded = decode_image(&path).unwrap();
        assert_eq!(decoded.height(), 2);
        assert_eq!(decoded.width(), 2);
        assert_eq!(decoded.pixels[[0, 0, 0]], 0);
        assert_eq!(decoded.pixels[[0, 0, 1]], 0);
        assert_eq!(decoded.pixels[[0, 0, 2]], 255);
    }

    #[test]
    fn decode_rejects_garbage_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        let err = decode_image(&path).unwrap_err();
        assert!(matches!(err, ClassifierError::ImageDecode(_)));
    }

    #[test]
    fn decode_rejects_missing_file() {
        let err = decode_image(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, ClassifierError::ImageDecode(_)));
    }
}
