//! End-to-end run: dataset, embeddings, projection, output.
use crate::amplify::tokenizer::ProteinTokenizer;
use crate::batching::{padded_length, Batcher};
use crate::config::PipelineConfig;
use crate::dataset::{read_dataset, DatasetSpec, ProteinRecord};
use crate::error::{PipelineError, PipelineResult};
use crate::extractor::{EmbeddingExtractor, EmbeddingMatrix, HiddenStateModel};
use crate::loader::load_model;
use crate::output::{render_scatter, write_projection};
use crate::projector::{project, ProjectionPoint, Projector, Umap};
use std::path::{Path, PathBuf};

impl From<&PipelineConfig> for Umap {
    fn from(config: &PipelineConfig) -> Self {
        Umap::builder()
            .n_neighbors(config.n_neighbors)
            .min_dist(config.min_dist)
            .n_epochs(config.n_epochs)
            .seed(config.seed)
            .build()
    }
}

impl PipelineConfig {
    pub fn dataset_spec(&self) -> DatasetSpec<'_> {
        DatasetSpec {
            label_column: &self.label_column,
            sequence_column: &self.sequence_column,
            n_rows: self.n_rows,
        }
    }
}

/// Where the results of a run are written.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub csv: PathBuf,
    pub plot: Option<PathBuf>,
}

impl From<&PipelineConfig> for OutputPaths {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            csv: config.output_path.clone(),
            plot: config.plot_path.clone(),
        }
    }
}

/// Embed `records` with an already loaded model.
pub fn embed_records<M: HiddenStateModel>(
    config: &PipelineConfig,
    model: &M,
    tokenizer: &ProteinTokenizer,
    records: &[ProteinRecord],
) -> PipelineResult<EmbeddingMatrix> {
    if let Some(limit) = model.max_length() {
        if padded_length(config.max_length) > limit {
            return Err(PipelineError::config(
                "max_length",
                format!(
                    "{} (padded to {}) exceeds the model's limit of {} tokens",
                    config.max_length,
                    padded_length(config.max_length),
                    limit
                ),
            ));
        }
    }
    let batcher = Batcher::new(tokenizer, config.batch_size, config.max_length)
        .with_workers(config.num_workers);
    tracing::info!(
        proteins = records.len(),
        batches = batcher.num_batches(records.len()),
        batch_size = config.batch_size,
        "extracting embeddings"
    );
    EmbeddingExtractor::new(model, config.layers)?.extract(&batcher, records)
}

/// Project `embeddings` and write the table, then the plot if requested.
///
/// Nothing is written unless the projection succeeds.
pub fn project_and_write<P: Projector + ?Sized>(
    projector: &P,
    embeddings: &EmbeddingMatrix,
    outputs: &OutputPaths,
) -> PipelineResult<Vec<ProjectionPoint>> {
    let points = project(projector, embeddings)?;
    write_projection(&outputs.csv, &points)?;
    if let Some(plot) = &outputs.plot {
        render_scatter(plot, &points)?;
    }
    Ok(points)
}

/// Everything after model loading, for a model supplied by the caller.
pub fn run_with_model<M: HiddenStateModel>(
    config: &PipelineConfig,
    model: &M,
    tokenizer: &ProteinTokenizer,
    records: &[ProteinRecord],
) -> PipelineResult<Vec<ProjectionPoint>> {
    let embeddings = embed_records(config, model, tokenizer, records)?;
    if let Some(path) = &config.embeddings_path {
        embeddings.save_safetensors(path)?;
        tracing::info!(path = %path.display(), "saved embeddings");
    }
    project_and_write(&Umap::from(config), &embeddings, &OutputPaths::from(config))
}

/// Full run driven by `config`.
pub fn run(config: &PipelineConfig) -> PipelineResult<Vec<ProjectionPoint>> {
    let source = config.check()?;
    let dataset_path = config
        .dataset_path
        .as_deref()
        .ok_or_else(|| PipelineError::config("dataset_path", "no dataset given"))?;
    tracing::info!(%source, model = %config.model_id, dataset = %dataset_path.display(), "starting run");

    let records = read_dataset(dataset_path, &config.dataset_spec())?;
    if records.is_empty() {
        tracing::warn!("dataset is empty, skipping the model");
        return project_and_write(
            &Umap::from(config),
            &EmbeddingMatrix::zeros(vec![], 0),
            &OutputPaths::from(config),
        );
    }

    let (model, tokenizer) = load_model(config)?;
    run_with_model(config, &model, &tokenizer, &records)
}

/// Re-project embeddings saved by an earlier run.
///
/// `dataset` must be the file (and column selection) the embeddings were extracted from,
/// so that labels line up row for row.
pub fn project_saved<P: Projector + ?Sized>(
    projector: &P,
    embeddings_path: &Path,
    dataset: &Path,
    spec: &DatasetSpec,
    outputs: &OutputPaths,
) -> PipelineResult<Vec<ProjectionPoint>> {
    let labels = read_dataset(dataset, spec)?
        .into_iter()
        .map(|r| r.label)
        .collect();
    let embeddings = EmbeddingMatrix::load_safetensors(embeddings_path, labels)?;
    tracing::info!(
        path = %embeddings_path.display(),
        proteins = embeddings.len(),
        dim = embeddings.dim(),
        "loaded embeddings"
    );
    project_and_write(projector, &embeddings, outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amplify::amplify::{tests::tiny_model, MaskConvention};
    use crate::loader::AmplifyEncoder;
    use plm_embed_test_data::TestFile;
    use tempfile::tempdir;

    fn small_config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            batch_size: 3,
            max_length: 64,
            num_workers: 2,
            layers: 2,
            n_neighbors: 3,
            n_epochs: 30,
            output_path: dir.join("umap.csv"),
            plot_path: Some(dir.join("umap.svg")),
            embeddings_path: Some(dir.join("embeddings.safetensors")),
            ..Default::default()
        }
    }

    #[test]
    fn test_run_with_tiny_model() -> PipelineResult<()> {
        let dir = tempdir()?;
        let config = small_config(dir.path());
        let (path, _handle) = TestFile::proteins_01().create_temp()?;
        let records = read_dataset(&path, &config.dataset_spec())?;
        let encoder = AmplifyEncoder::new(tiny_model()?, MaskConvention::Binary);
        let tokenizer = ProteinTokenizer::bundled()?;

        let points = run_with_model(&config, &encoder, &tokenizer, &records)?;
        assert_eq!(points.len(), records.len());
        let labels: Vec<&str> = points.iter().map(|p| p.protein.as_str()).collect();
        let expected: Vec<&str> = records.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, expected);

        let csv = std::fs::read_to_string(&config.output_path)?;
        assert_eq!(csv.lines().next(), Some("protein,x,y"));
        assert_eq!(csv.lines().count(), records.len() + 1);
        assert!(config.plot_path.as_ref().unwrap().exists());

        // saved embeddings project to the same points
        let again = project_saved(
            &Umap::from(&config),
            config.embeddings_path.as_ref().unwrap(),
            Path::new(&path),
            &config.dataset_spec(),
            &OutputPaths {
                csv: dir.path().join("again.csv"),
                plot: None,
            },
        )?;
        assert_eq!(again, points);
        Ok(())
    }

    #[test]
    fn test_max_length_beyond_model_limit() -> PipelineResult<()> {
        let dir = tempdir()?;
        let config = PipelineConfig {
            max_length: 100,
            ..small_config(dir.path())
        };
        let records = vec![ProteinRecord {
            label: "p".to_string(),
            sequence: "MKV".to_string(),
        }];
        let encoder = AmplifyEncoder::new(tiny_model()?, MaskConvention::Binary);
        let tokenizer = ProteinTokenizer::bundled()?;
        let err = run_with_model(&config, &encoder, &tokenizer, &records).unwrap_err();
        assert!(matches!(err, PipelineError::Config { ref field, .. } if field == "max_length"));
        assert!(!config.output_path.exists());

        let at_limit = PipelineConfig {
            max_length: 64,
            ..small_config(dir.path())
        };
        assert_eq!(embed_records(&at_limit, &encoder, &tokenizer, &records)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_invalid_source_writes_nothing() {
        let dir = tempdir().unwrap();
        let (path, _handle) = TestFile::proteins_01().create_temp().unwrap();
        let config = PipelineConfig {
            source: "tensorflow".to_string(),
            dataset_path: Some(PathBuf::from(path)),
            ..small_config(dir.path())
        };
        let err = run(&config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSource(_)));
        assert!(!config.output_path.exists());
        assert!(!config.plot_path.unwrap().exists());
    }

    #[test]
    fn test_empty_dataset_is_header_only() -> PipelineResult<()> {
        let dir = tempdir()?;
        let (path, _handle) = TestFile::proteins_empty().create_temp()?;
        let config = PipelineConfig {
            dataset_path: Some(PathBuf::from(path)),
            ..small_config(dir.path())
        };
        let points = run(&config)?;
        assert!(points.is_empty());
        let csv = std::fs::read_to_string(&config.output_path)?;
        assert_eq!(csv.trim_end(), "protein,x,y");
        Ok(())
    }

    #[test]
    fn test_missing_dataset_path() {
        let dir = tempdir().unwrap();
        let err = run(&small_config(dir.path())).unwrap_err();
        assert!(matches!(err, PipelineError::Config { ref field, .. } if field == "dataset_path"));
    }
}
