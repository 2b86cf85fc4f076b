//! Model output decoding and class-mask extraction

use ndarray::{Array2, ArrayD, Axis, Ix3, IxDyn};
use serde_json::Value;
use tracing::debug;

use super::types::{ClassMask, InferenceError};

/// Shape of a nested JSON array, following the first element at each level
fn nested_shape(value: &Value) -> Vec<usize> {
    let mut shape = Vec::new();
    let mut current = value;
    while let Value::Array(items) = current {
        shape.push(items.len());
        match items.first() {
            Some(first) => current = first,
            None => break,
        }
    }
    shape
}

fn flatten_into(value: &Value, shape: &[usize], out: &mut Vec<f32>) -> Result<(), String> {
    match shape.split_first() {
        None => {
            let n = value
                .as_f64()
                .ok_or_else(|| format!("expected a number, found {}", value))?;
            out.push(n as f32);
        }
        Some((&len, rest)) => {
            let items = value
                .as_array()
                .filter(|items| items.len() == len)
                .ok_or("ragged nested array")?;
            for item in items {
                flatten_into(item, rest, out)?;
            }
        }
    }
    Ok(())
}

/// Convert a nested JSON numeric array into a dynamic-rank score array
pub fn scores_from_json(value: &Value) -> Result<ArrayD<f32>, String> {
    let shape = nested_shape(value);
    let mut data = Vec::with_capacity(shape.iter().product());
    flatten_into(value, &shape, &mut data)?;
    ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| e.to_string())
}

/// Reduce raw class scores to a per-pixel class mask.
///
/// Accepts (1, C, H, W) or (C, H, W); the class with the highest score wins,
/// the lowest index on ties.
pub fn postprocess_output(scores: &ArrayD<f32>) -> Result<ClassMask, InferenceError> {
    debug!("Received logits shape: {:?}", scores.shape());

    let scores = match scores.shape() {
        [1, _, _, _] => scores.index_axis(Axis(0), 0),
        [_, _, _] => scores.view(),
        shape => {
            return Err(InferenceError::Shape(format!(
                "expected scores shaped (1, C, H, W) or (C, H, W), got {:?}",
                shape
            )));
        }
    };
    let scores = scores
        .into_dimensionality::<Ix3>()
        .map_err(|e| InferenceError::Shape(e.to_string()))?;

    let (classes, height, width) = scores.dim();
    if classes == 0 || classes > u8::MAX as usize + 1 {
        return Err(InferenceError::Shape(format!(
            "cannot build a class mask from {} classes",
            classes
        )));
    }

    let mask = Array2::from_shape_fn((height, width), |(y, x)| {
        let mut best = 0usize;
        let mut best_score = scores[[0, y, x]];
        for class in 1..classes {
            // NaN wins over every number and the first NaN sticks
            if best_score.is_nan() {
                break;
            }
            let score = scores[[class, y, x]];
            if score > best_score || score.is_nan() {
                best = class;
                best_score = score;
            }
        }
        best as u8
    });

    debug!("Predicted mask shape: {:?}", mask.dim());
    Ok(mask)
}
