use crate::cli::{RunArgs, UmapArgs};
use anyhow::Context;
use plm_embed::pipeline;
use plm_embed::PipelineConfig;

impl UmapArgs {
    pub fn apply(self, config: &mut PipelineConfig) {
        if let Some(v) = self.n_neighbors {
            config.n_neighbors = v;
        }
        if let Some(v) = self.min_dist {
            config.min_dist = v;
        }
        if let Some(v) = self.n_epochs {
            config.n_epochs = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
    }
}

impl RunArgs {
    fn into_config(self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        macro_rules! set {
            ($($arg:ident => $field:ident),* $(,)?) => {
                $(if let Some(v) = self.$arg { config.$field = v; })*
            };
        }
        macro_rules! set_some {
            ($($arg:ident => $field:ident),* $(,)?) => {
                $(if let Some(v) = self.$arg { config.$field = Some(v); })*
            };
        }
        set!(
            source => source,
            model_id => model_id,
            revision => revision,
            device => device,
            precision => precision,
            batch_size => batch_size,
            max_length => max_length,
            num_workers => num_workers,
            layers => layers,
            label_column => label_column,
            sequence_column => sequence_column,
            output => output_path,
        );
        set_some!(
            checkpoint => checkpoint_path,
            model_config => config_path,
            tokenizer => tokenizer_path,
            dataset => dataset_path,
            n_rows => n_rows,
            plot => plot_path,
            embeddings => embeddings_path,
        );
        self.umap.apply(&mut config);
        Ok(config)
    }
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let config = args.into_config()?;
    let points = pipeline::run(&config)?;
    tracing::info!(
        proteins = points.len(),
        output = %config.output_path.display(),
        "done"
    );
    Ok(())
}
