//! Conversions between loaded embedding pairs (`Vec<f32>`) and burn tensors.

use burn::prelude::*;
use burn::tensor::TensorData;

/// Stack equally sized embedding rows into a `(rows, dim)` tensor.
///
/// # Panics
/// Panics if `rows` is empty or the rows disagree on length. The dataset
/// loader rejects such records before they reach a batch.
pub fn embeddings_to_tensor<B: Backend>(rows: &[&[f32]], device: &B::Device) -> Tensor<B, 2> {
    assert!(!rows.is_empty(), "embedding batch must not be empty");
    let dim = rows[0].len();
    assert!(dim > 0, "embedding dimension must be > 0");

    let mut flat = Vec::with_capacity(rows.len() * dim);
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row.len(), dim, "embedding {i} has length {}, expected {dim}", row.len());
        flat.extend_from_slice(row);
    }
    Tensor::from_data(TensorData::new(flat, [rows.len(), dim]), device)
}

/// Preference targets as a `(batch,)` tensor.
pub fn targets_to_tensor<B: Backend>(targets: &[f32], device: &B::Device) -> Tensor<B, 1> {
    Tensor::from_data(TensorData::new(targets.to_vec(), [targets.len()]), device)
}

/// Extract the values of a 1D tensor as f64, whatever the backend float type.
pub fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 1>) -> Vec<f64> {
    tensor.into_data().iter::<f64>().collect()
}

/// Extract the single value of a one-element tensor.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem()
}
