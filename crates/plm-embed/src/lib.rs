//! plm-embed
//!
//! - per-protein embeddings from the AMPLIFY protein language model.
//! - 2D UMAP projection of those embeddings, written as a `protein,x,y` table and a scatter plot.
//!
pub mod amplify;
pub mod batching;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extractor;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod projector;

pub use amplify::amplify::{MaskConvention, AMPLIFY};
pub use amplify::config::AMPLIFYConfig;
pub use amplify::outputs::ModelOutput;
pub use amplify::tokenizer::ProteinTokenizer;
pub use config::{ComputeDevice, PipelineConfig, Precision};
pub use error::{PipelineError, PipelineResult};
pub use extractor::{EmbeddingExtractor, EmbeddingMatrix, HiddenStateModel};
pub use loader::ModelSource;
pub use projector::{ProjectionPoint, Projector, Umap};
