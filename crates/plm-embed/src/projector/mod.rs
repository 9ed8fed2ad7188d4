//! 2D projection of embedding matrices
pub mod umap;

pub use umap::Umap;

use crate::error::{PipelineError, PipelineResult};
use crate::extractor::EmbeddingMatrix;

/// A manifold reduction from `[n, dim]` to `[n, 2]`.
pub trait Projector {
    /// One point per input row, in row order.
    fn fit_transform(&self, embeddings: &EmbeddingMatrix) -> PipelineResult<Vec<[f32; 2]>>;
}

/// A projected protein, as written to the output file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionPoint {
    pub protein: String,
    pub x: f32,
    pub y: f32,
}

/// Project `embeddings` and pair every point with its label.
pub fn project<P: Projector + ?Sized>(
    projector: &P,
    embeddings: &EmbeddingMatrix,
) -> PipelineResult<Vec<ProjectionPoint>> {
    if embeddings.as_slice().iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Shape(
            "embeddings contain non-finite values".to_string(),
        ));
    }
    let coords = projector.fit_transform(embeddings)?;
    if coords.len() != embeddings.len() {
        return Err(PipelineError::Shape(format!(
            "projector returned {} points for {} proteins",
            coords.len(),
            embeddings.len()
        )));
    }
    Ok(embeddings
        .labels()
        .iter()
        .zip(coords)
        .map(|(label, [x, y])| ProjectionPoint {
            protein: label.clone(),
            x,
            y,
        })
        .collect())
}
