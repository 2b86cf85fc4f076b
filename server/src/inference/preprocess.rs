//! Band reading and resampling to the model input size

use ndarray::{Array2, Array3, Array4, ArrayView2, Axis};
use tracing::debug;

use super::raster::RasterReader;
use super::types::InferenceError;

/// Source taps for one output axis: (lower index, upper index, upper weight).
///
/// Pixel centers are aligned (align_corners=false): an output index maps to
/// `(i + 0.5) * in / out - 0.5`, clamped at zero.
fn source_taps(in_len: usize, out_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = in_len as f32 / out_len as f32;
    (0..out_len)
        .map(|i| {
            let src = ((i as f32 + 0.5) * scale - 0.5).max(0.0);
            let lo = (src.floor() as usize).min(in_len - 1);
            let hi = (lo + 1).min(in_len - 1);
            (lo, hi, src - lo as f32)
        })
        .collect()
}

/// Bilinear resample of a single band
pub fn resize_bilinear(band: ArrayView2<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (in_h, in_w) = band.dim();
    let rows = source_taps(in_h, out_h);
    let cols = source_taps(in_w, out_w);

    Array2::from_shape_fn((out_h, out_w), |(y, x)| {
        let (y0, y1, wy) = rows[y];
        let (x0, x1, wx) = cols[x];
        let top = band[[y0, x0]] * (1.0 - wx) + band[[y0, x1]] * wx;
        let bottom = band[[y1, x0]] * (1.0 - wx) + band[[y1, x1]] * wx;
        top * (1.0 - wy) + bottom * wy
    })
}

/// Resample every band to `size` x `size`
pub fn resize_bands(bands: &Array3<f32>, size: usize) -> Array3<f32> {
    let mut resized = Array3::zeros((bands.dim().0, size, size));
    for (mut out, band) in resized.outer_iter_mut().zip(bands.outer_iter()) {
        out.assign(&resize_bilinear(band, size, size));
    }
    resized
}

/// Decode a raster and build the model input.
///
/// Returns `(batched, display)`: the (1, bands, size, size) network input and
/// the same values without the batch axis for rendering.
pub fn preprocess_raster(
    bytes: &[u8],
    bands: &[usize],
    size: usize,
) -> Result<(Array4<f32>, Array3<f32>), InferenceError> {
    let reader = RasterReader::open(bytes)?;
    debug!(
        "Opened TIFF with {} bands, {}x{}, dtype: {}",
        reader.band_count(),
        reader.height(),
        reader.width(),
        reader.sample_type()
    );

    let raster = reader.read_bands(bands)?;
    let resized = resize_bands(&raster.data, size);
    debug!("Resized input shape for model: {:?}", resized.dim());

    let batched = resized.clone().insert_axis(Axis(0));
    Ok((batched, resized))
}
