//! RGB display rendering, overlay compositing and PNG encoding

use image::codecs::png::PngEncoder;
use image::{GrayImage, ImageEncoder, Luma, Rgb, RgbImage};
use ndarray::{Array2, Array3, ArrayView2, Axis};

use super::types::{ClassMask, InferenceError, OverlayStyle};

/// Lower and upper percentiles of the contrast stretch
const STRETCH_PERCENTILES: (f64, f64) = (2.0, 98.0);

/// Guards the stretch denominator for flat bands
const STRETCH_EPSILON: f64 = 1e-8;

/// Percentile of sorted samples with linear interpolation between ranks
fn percentile(sorted: &[f32], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let lower = sorted[lo] as f64;
    lower + (sorted[hi] as f64 - lower) * (rank - lo as f64)
}

/// Stretch one band between its 2nd and 98th percentiles into 0..=255
fn stretch_band(band: ArrayView2<f32>) -> Array2<u8> {
    let mut sorted: Vec<f32> = band.iter().copied().collect();
    sorted.sort_unstable_by(f32::total_cmp);

    let low = percentile(&sorted, STRETCH_PERCENTILES.0);
    let high = percentile(&sorted, STRETCH_PERCENTILES.1);
    let range = high - low + STRETCH_EPSILON;

    band.mapv(|v| {
        let stretched = ((v as f64 - low) / range).clamp(0.0, 1.0);
        (stretched * 255.0) as u8
    })
}

/// Render three tensor bands as a percentile-stretched RGB image.
///
/// `rgb_bands` are 0-based indices into the (bands, height, width) tensor.
pub fn create_rgb_display(
    tensor: &Array3<f32>,
    rgb_bands: [usize; 3],
) -> Result<RgbImage, InferenceError> {
    let (bands, height, width) = tensor.dim();
    if let Some(&band) = rgb_bands.iter().find(|&&b| b >= bands) {
        return Err(InferenceError::Shape(format!(
            "display band {} requested but tensor has {} bands",
            band, bands
        )));
    }

    let [r, g, b] = rgb_bands.map(|band| stretch_band(tensor.index_axis(Axis(0), band)));

    Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([r[[y, x]], g[[y, x]], b[[y, x]]])
    }))
}

/// Stencil that is opaque where the mask holds `class_value`
pub fn class_stencil(mask: &ClassMask, class_value: u8) -> GrayImage {
    let (height, width) = mask.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if mask[[y as usize, x as usize]] == class_value {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Composite a translucent highlight over every pixel of the target class.
/// Pixels outside the class are returned unchanged.
pub fn create_overlay(
    rgb: &RgbImage,
    mask: &ClassMask,
    style: &OverlayStyle,
) -> Result<RgbImage, InferenceError> {
    let (mask_h, mask_w) = mask.dim();
    if (rgb.width() as usize, rgb.height() as usize) != (mask_w, mask_h) {
        return Err(InferenceError::Shape(format!(
            "mask is {}x{} but image is {}x{}",
            mask_h,
            mask_w,
            rgb.height(),
            rgb.width()
        )));
    }

    let stencil = class_stencil(mask, style.class_value);
    let mut out = rgb.clone();

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let coverage = stencil.get_pixel(x, y)[0] as u32;
        if coverage == 0 {
            continue;
        }
        let alpha = style.alpha as u32 * coverage / 255;
        for (channel, &color) in pixel.0.iter_mut().zip(style.color.0.iter()) {
            let blended = (color as u32 * alpha + *channel as u32 * (255 - alpha) + 127) / 255;
            *channel = blended as u8;
        }
    }

    Ok(out)
}

/// Encode an RGB image as PNG
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, InferenceError> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| InferenceError::Encode(e.to_string()))?;
    Ok(buffer)
}
