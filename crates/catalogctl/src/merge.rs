use crate::output::{print_config, Output};
use crate::render::render_one;

/// Union catalogs into one under a conflict policy.
#[derive(Debug, clap::Args)]
pub struct MergeArgs {
    /// Catalog references, in ascending priority order
    #[clap(required = true, num_args = 2..)]
    refs: Vec<String>,

    /// Conflict policy for records sharing a key
    #[clap(long, value_enum, default_value = "prefer-last")]
    strategy: Strategy,

    #[clap(flatten)]
    output: Output,
}

#[derive(Debug, clap::ValueEnum, Clone, Copy)]
pub enum Strategy {
    /// Keep the last occurrence of each keyed record verbatim
    PreferLast,
    /// Deep-merge fields of keyed records
    TwoWay,
}

pub fn run(args: MergeArgs) -> anyhow::Result<()> {
    let mut configs = Vec::with_capacity(args.refs.len());
    for reference in &args.refs {
        configs.push(render_one(reference)?);
    }

    let policy = match args.strategy {
        Strategy::PreferLast => declcfg::MergePolicy::PreferLast,
        Strategy::TwoWay => declcfg::MergePolicy::TwoWay,
    };
    print_config(&declcfg::merge(configs, policy), &args.output)
}
