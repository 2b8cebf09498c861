use std::path::PathBuf;

use anyhow::Context;
use diff::{DiffGenerator, DiffIncluder};

use crate::output::{print_config, Output};
use crate::render::render_one;

/// Compute the minimal catalog carrying the new or changed content of the
/// newer reference, plus its dependency closure.
#[derive(Debug, clap::Args)]
pub struct DiffArgs {
    /// Old and new catalog references; with a single reference, only
    /// channel heads are kept
    #[clap(required = true, num_args = 1..=2)]
    refs: Vec<String>,

    /// Leave requirements unresolved instead of carrying their providers
    #[clap(long)]
    skip_dependencies: bool,

    /// Keep only channel heads of the new reference
    #[clap(long)]
    heads_only: bool,

    /// Keep included content in addition to the computed change set
    #[clap(long)]
    include_additively: bool,

    /// Path to a YAML include-filter file
    #[clap(long)]
    include_file: Option<PathBuf>,

    #[clap(flatten)]
    output: Output,
}

pub fn run(args: DiffArgs) -> anyhow::Result<()> {
    let (old, new) = match args.refs.as_slice() {
        [new] => (model::Model::default(), load_model(new)?),
        [old, new] => (load_model(old)?, load_model(new)?),
        _ => unreachable!("clap enforces one or two references"),
    };

    let includer = match &args.include_file {
        None => DiffIncluder::default(),
        Some(path) => {
            let buf = std::fs::read(path)
                .with_context(|| format!("failed to read include file {}", path.display()))?;
            serde_yaml::from_slice(&buf)
                .with_context(|| format!("failed to parse include file {}", path.display()))?
        }
    };

    let generator = DiffGenerator {
        skip_dependencies: args.skip_dependencies,
        heads_only: args.heads_only,
        include_additively: args.include_additively,
        includer,
    };
    let out = generator
        .run(&old, &new)
        .context("failed to diff catalogs")?;

    print_config(&declcfg::convert_from_model(&out), &args.output)
}

fn load_model(reference: &str) -> anyhow::Result<model::Model> {
    let cfg = render_one(reference)?;
    let model = declcfg::convert_to_model(&cfg)
        .with_context(|| format!("reference {reference:?} is not a valid catalog"))?;
    Ok(model)
}
