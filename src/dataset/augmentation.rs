//! Data Augmentation Module for Fundus Photographs
//!
//! Retinal images have no canonical orientation, so training uses the full
//! dihedral group plus arbitrary rotation, random zoom and lighting jitter.
//!
//! # Augmentation Strategy
//!
//! - **Training**: dihedral flip, rotation (zero padding), random zoom, brightness/contrast
//! - **Validation/Test**: squish resize only
//! - **TTA**: rotation and lighting as in training, plus a fixed corner zoom
//!   and an optional horizontal flip chosen by the pass index
//!
//! Geometric transforms run after the squish resize, on the target-size image.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{GradingError, Result};

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Number of test-time augmentation passes (4 zoom corners x optional flip)
pub const TTA_PASSES: usize = 8;

const LOGIT_EPS: f32 = 1e-6;

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Random horizontal flips
    pub do_flip: bool,
    /// With `do_flip`, sample from all 8 dihedral symmetries instead
    pub flip_vert: bool,
    /// Maximum rotation angle in degrees (applies ±max_rotate)
    pub max_rotate: f32,
    /// Probability of applying rotation
    pub rotate_prob: f32,
    /// Maximum zoom factor (zoom is drawn from [1, max_zoom])
    pub max_zoom: f32,
    /// Probability of applying zoom
    pub zoom_prob: f32,
    /// Lighting jitter magnitude for brightness and contrast
    pub max_lighting: f32,
    /// Probability of each lighting transform
    pub lighting_prob: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            do_flip: true,
            flip_vert: true,
            max_rotate: 360.0,
            rotate_prob: 0.75,
            max_zoom: 1.3,
            zoom_prob: 0.75,
            max_lighting: 0.2,
            lighting_prob: 0.75,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations (for validation/inference)
    pub fn none() -> Self {
        Self {
            do_flip: false,
            flip_vert: false,
            max_rotate: 0.0,
            rotate_prob: 0.0,
            max_zoom: 1.0,
            zoom_prob: 0.0,
            max_lighting: 0.0,
            lighting_prob: 0.0,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, p) in [
            ("rotate_prob", self.rotate_prob),
            ("zoom_prob", self.zoom_prob),
            ("lighting_prob", self.lighting_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("{} must be in [0, 1], got {}", name, p));
            }
        }
        if !(self.max_rotate >= 0.0 && self.max_rotate.is_finite()) {
            return Err(format!(
                "max_rotate must be a finite, non-negative angle, got {}",
                self.max_rotate
            ));
        }
        if !(self.max_zoom >= 1.0) {
            return Err(format!("max_zoom must be >= 1, got {}", self.max_zoom));
        }
        if !(0.0..1.0).contains(&self.max_lighting) {
            return Err(format!(
                "max_lighting must be in [0, 1), got {}",
                self.max_lighting
            ));
        }
        Ok(())
    }
}

/// Rotation plus zoom, in normalized image coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineParams {
    pub angle_degrees: f32,
    /// Zoom factor (>= 1 crops in)
    pub scale: f32,
    /// Vertical anchor of the zoom window, 0 = top, 1 = bottom
    pub row_pct: f32,
    /// Horizontal anchor of the zoom window, 0 = left, 1 = right
    pub col_pct: f32,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            angle_degrees: 0.0,
            scale: 1.0,
            row_pct: 0.5,
            col_pct: 0.5,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.angle_degrees.abs() < 1e-3 && (self.scale - 1.0).abs() < 1e-6
    }

    /// Map an output position in [-1, 1]^2 to its source position
    pub fn source(&self, nx: f32, ny: f32) -> (f32, f32) {
        let shift = 2.0 * (1.0 - 1.0 / self.scale);
        let zx = nx / self.scale + (self.col_pct - 0.5) * shift;
        let zy = ny / self.scale + (self.row_pct - 0.5) * shift;

        let (sin_a, cos_a) = self.angle_degrees.to_radians().sin_cos();
        (cos_a * zx - sin_a * zy, sin_a * zx + cos_a * zy)
    }
}

/// Image augmenter for fundus photographs
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: u32,
}

impl Augmenter {
    /// Create a new augmenter with the given configuration
    pub fn new(config: AugmentationConfig, image_size: u32) -> Self {
        Self { config, image_size }
    }

    /// Create an augmenter with no augmentation (for validation/inference)
    pub fn no_augmentation(image_size: u32) -> Self {
        Self::new(AugmentationConfig::none(), image_size)
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Decode an image and squish it to the target size
    pub fn load(&self, path: &Path) -> Result<RgbImage> {
        let img = ImageReader::open(path)
            .map_err(|e| GradingError::Image(path.to_path_buf(), e.to_string()))?
            .with_guessed_format()
            .map_err(|e| GradingError::Image(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| GradingError::Image(path.to_path_buf(), e.to_string()))?;

        Ok(self.resize(img))
    }

    /// Squish resize (aspect ratio not preserved)
    pub fn resize(&self, img: DynamicImage) -> RgbImage {
        img.resize_exact(self.image_size, self.image_size, FilterType::Triangle)
            .to_rgb8()
    }

    /// Training view: random dihedral, rotation, zoom and lighting
    pub fn augment(&self, img: RgbImage, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let mut img = img;

        if self.config.do_flip {
            let k = if self.config.flip_vert {
                rng.gen_range(0..8u8)
            } else if rng.gen::<bool>() {
                1
            } else {
                0
            };
            img = dihedral(img, k);
        }

        let mut params = AffineParams::identity();
        if self.config.rotate_prob > 0.0 && rng.gen::<f32>() < self.config.rotate_prob {
            params.angle_degrees = rng.gen_range(-self.config.max_rotate..=self.config.max_rotate);
        }
        if self.config.zoom_prob > 0.0 && rng.gen::<f32>() < self.config.zoom_prob {
            params.scale = rng.gen_range(1.0..=self.config.max_zoom);
            params.row_pct = rng.gen::<f32>();
            params.col_pct = rng.gen::<f32>();
        }

        let img = warp(&img, &params);
        let mut data = to_tensor_data(&img);
        self.random_lighting(&mut data, rng);
        data
    }

    /// TTA view for `pass` in `0..TTA_PASSES`
    ///
    /// The zoom window sits at row `pass & 1`, column `(pass >> 1) & 1`; passes
    /// with `pass & 4` are flipped horizontally. Rotation and lighting stay random.
    pub fn tta_view(&self, img: RgbImage, pass: usize, scale: f32, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let mut params = AffineParams {
            angle_degrees: 0.0,
            scale,
            row_pct: (pass & 1) as f32,
            col_pct: ((pass >> 1) & 1) as f32,
        };
        if self.config.rotate_prob > 0.0 && rng.gen::<f32>() < self.config.rotate_prob {
            params.angle_degrees = rng.gen_range(-self.config.max_rotate..=self.config.max_rotate);
        }

        let mut img = warp(&img, &params);
        if pass & 4 != 0 {
            image::imageops::flip_horizontal_in_place(&mut img);
        }

        let mut data = to_tensor_data(&img);
        self.random_lighting(&mut data, rng);
        data
    }

    /// Plain view for validation and standard inference
    pub fn plain_view(&self, img: &RgbImage) -> Vec<f32> {
        to_tensor_data(img)
    }

    fn random_lighting(&self, data: &mut [f32], rng: &mut ChaCha8Rng) {
        let max = self.config.max_lighting;
        if max <= 0.0 || self.config.lighting_prob <= 0.0 {
            return;
        }

        let mut brightness = 0.5;
        let mut contrast = 1.0;
        if rng.gen::<f32>() < self.config.lighting_prob {
            brightness = rng.gen_range(0.5 - max / 2.0..=0.5 + max / 2.0);
        }
        if rng.gen::<f32>() < self.config.lighting_prob {
            // log-uniform in [1 - max, 1 / (1 - max)]
            let lo = (1.0 - max).ln();
            contrast = rng.gen_range(lo..=-lo).exp();
        }

        apply_lighting(data, brightness, contrast);
    }
}

/// One of the 8 symmetries of the square: bit 0 flips horizontally,
/// bit 1 vertically, bit 2 transposes
pub fn dihedral(img: RgbImage, k: u8) -> RgbImage {
    let mut img = img;
    if k & 1 != 0 {
        image::imageops::flip_horizontal_in_place(&mut img);
    }
    if k & 2 != 0 {
        image::imageops::flip_vertical_in_place(&mut img);
    }
    if k & 4 != 0 {
        let rotated = image::imageops::rotate90(&img);
        img = image::imageops::flip_horizontal(&rotated);
    }
    img
}

/// Resample `img` through an affine map; outside pixels are black
pub fn warp(img: &RgbImage, params: &AffineParams) -> RgbImage {
    if params.is_identity() {
        return img.clone();
    }

    let (width, height) = img.dimensions();
    let (w, h) = (width as f32, height as f32);

    RgbImage::from_fn(width, height, |x, y| {
        let nx = 2.0 * (x as f32 + 0.5) / w - 1.0;
        let ny = 2.0 * (y as f32 + 0.5) / h - 1.0;
        let (sx, sy) = params.source(nx, ny);
        bilinear_sample(img, (sx + 1.0) * w / 2.0 - 0.5, (sy + 1.0) * h / 2.0 - 0.5)
    })
}

/// Sample a pixel using bilinear interpolation, zero padding outside
fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();

    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;

        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}

/// Convert image to CHW float data in [0, 1]
pub fn to_tensor_data(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (i, pixel) in img.pixels().enumerate() {
        data[i] = pixel[0] as f32 / 255.0;
        data[plane + i] = pixel[1] as f32 / 255.0;
        data[2 * plane + i] = pixel[2] as f32 / 255.0;
    }

    data
}

/// Brightness and contrast in logit space
///
/// `brightness` is a target in (0, 1) with 0.5 as identity; `contrast`
/// scales logits with 1.0 as identity.
pub fn apply_lighting(data: &mut [f32], brightness: f32, contrast: f32) {
    let shift = logit(brightness);
    for v in data.iter_mut() {
        *v = sigmoid((logit(*v) + shift) * contrast);
    }
}

fn logit(x: f32) -> f32 {
    let x = x.clamp(LOGIT_EPS, 1.0 - LOGIT_EPS);
    (x / (1.0 - x)).ln()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn create_test_image(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]))
    }

    #[test]
    fn test_defaults_follow_fundus_policy() {
        let config = AugmentationConfig::default();
        assert!(config.do_flip && config.flip_vert);
        assert_eq!(config.max_rotate, 360.0);
        assert_eq!(config.max_zoom, 1.3);
        assert!(config.validate().is_ok());
        assert!(AugmentationConfig::none().validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = AugmentationConfig {
            max_zoom: 0.5,
            ..AugmentationConfig::default()
        };
        assert!(config.validate().is_err());

        for max_rotate in [-10.0, f32::NAN, f32::INFINITY] {
            let config = AugmentationConfig {
                max_rotate,
                ..AugmentationConfig::default()
            };
            assert!(config.validate().is_err(), "max_rotate {} accepted", max_rotate);
        }

        let still = AugmentationConfig {
            max_rotate: 0.0,
            ..AugmentationConfig::default()
        };
        assert!(still.validate().is_ok());
    }

    #[test]
    fn test_augment_keeps_shape() {
        let aug = Augmenter::new(AugmentationConfig::default(), 32);
        let mut rng = ChaCha8Rng::seed_from_u64(43);

        for _ in 0..5 {
            let data = aug.augment(create_test_image(32), &mut rng);
            assert_eq!(data.len(), 3 * 32 * 32);
            assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_augment_reproducible() {
        let aug = Augmenter::new(AugmentationConfig::default(), 16);
        let a = aug.augment(create_test_image(16), &mut ChaCha8Rng::seed_from_u64(5));
        let b = aug.augment(create_test_image(16), &mut ChaCha8Rng::seed_from_u64(5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_augmentation_is_identity() {
        let aug = Augmenter::no_augmentation(16);
        let img = create_test_image(16);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(aug.augment(img.clone(), &mut rng), aug.plain_view(&img));
    }

    #[test]
    fn test_dihedral_group() {
        let img = create_test_image(8);
        // flipping twice and transposing twice are identities
        assert_eq!(dihedral(dihedral(img.clone(), 1), 1), img);
        assert_eq!(dihedral(dihedral(img.clone(), 4), 4), img);

        let t = dihedral(img.clone(), 4);
        assert_eq!(t.get_pixel(2, 5), img.get_pixel(5, 2));
    }

    #[test]
    fn test_identity_warp() {
        let img = create_test_image(16);
        assert_eq!(warp(&img, &AffineParams::identity()), img);
    }

    #[test]
    fn test_rotation_pads_corners_black() {
        let img = RgbImage::from_pixel(32, 32, Rgb([200, 200, 200]));
        let params = AffineParams {
            angle_degrees: 45.0,
            ..AffineParams::identity()
        };
        let rotated = warp(&img, &params);
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(rotated.get_pixel(16, 16), &Rgb([200, 200, 200]));
    }

    #[test]
    fn test_corner_zoom_anchors() {
        // top-left anchored zoom keeps the top-left corner in place
        let params = AffineParams {
            angle_degrees: 0.0,
            scale: 1.35,
            row_pct: 0.0,
            col_pct: 0.0,
        };
        let (sx, sy) = params.source(-1.0, -1.0);
        assert!((sx + 1.0).abs() < 1e-5);
        assert!((sy + 1.0).abs() < 1e-5);

        let bottom_right = AffineParams {
            row_pct: 1.0,
            col_pct: 1.0,
            ..params
        };
        let (sx, sy) = bottom_right.source(1.0, 1.0);
        assert!((sx - 1.0).abs() < 1e-5);
        assert!((sy - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_tta_views_differ_by_pass() {
        let aug = Augmenter::no_augmentation(16);
        let img = create_test_image(16);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let views: Vec<Vec<f32>> = (0..TTA_PASSES)
            .map(|pass| aug.tta_view(img.clone(), pass, 1.35, &mut rng))
            .collect();
        assert_ne!(views[0], views[1]);
        assert_ne!(views[0], views[4]);
        assert!(views.iter().all(|v| v.len() == 3 * 16 * 16));
    }

    #[test]
    fn test_lighting_identity_and_direction() {
        let mut data = vec![0.2, 0.5, 0.8];
        let original = data.clone();
        apply_lighting(&mut data, 0.5, 1.0);
        for (a, b) in data.iter().zip(&original) {
            assert!((a - b).abs() < 1e-5);
        }

        let mut brighter = original.clone();
        apply_lighting(&mut brighter, 0.6, 1.0);
        assert!(brighter.iter().zip(&original).all(|(a, b)| a > b));

        let mut contrasted = original.clone();
        apply_lighting(&mut contrasted, 0.5, 1.25);
        assert!(contrasted[0] < original[0]);
        assert!((contrasted[1] - 0.5).abs() < 1e-5);
        assert!(contrasted[2] > original[2]);
    }

    #[test]
    fn test_to_tensor_data_is_chw() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
        let data = to_tensor_data(&img);
        assert_eq!(data.len(), 12);
        assert_eq!(&data[0..4], &[1.0; 4]);
        assert_eq!(&data[4..8], &[0.0; 4]);
        assert!((data[8] - 0.2).abs() < 1e-6);
    }
}
