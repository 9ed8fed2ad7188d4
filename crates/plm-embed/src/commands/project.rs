use crate::cli::ProjectArgs;
use plm_embed::dataset::DatasetSpec;
use plm_embed::pipeline::{project_saved, OutputPaths};
use plm_embed::{PipelineConfig, Umap};
use validator::Validate;

pub fn execute(args: ProjectArgs) -> anyhow::Result<()> {
    // reuse the run config for defaults and range checks
    let mut config = PipelineConfig::default();
    args.umap.apply(&mut config);
    config.validate()?;

    let spec = DatasetSpec {
        label_column: &args.label_column,
        sequence_column: &args.sequence_column,
        n_rows: args.n_rows,
    };
    let outputs = OutputPaths {
        csv: args.output,
        plot: args.plot,
    };
    let points = project_saved(
        &Umap::from(&config),
        &args.embeddings,
        &args.labels,
        &spec,
        &outputs,
    )?;
    tracing::info!(proteins = points.len(), output = %outputs.csv.display(), "done");
    Ok(())
}
