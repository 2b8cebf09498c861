use anyhow::Context;
use sources::ImageRegistry;
use tokio_util::sync::CancellationToken;

use crate::output::{print_config, Output};
use crate::registry::NullRegistry;

/// Render catalog references into their canonical declarative form.
#[derive(Debug, clap::Args)]
pub struct RenderArgs {
    /// Catalog references: declarative config directories or relational
    /// catalog files
    #[clap(required = true)]
    refs: Vec<String>,

    #[clap(flatten)]
    output: Output,
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let registry = NullRegistry;
    let render = sources::Render::new(&registry, args.refs);
    // The handle is released whether or not the run succeeded.
    let result = render.run(&CancellationToken::new());
    registry.destroy().ok();

    let cfg = result.context("failed to render catalog references")?;
    print_config(&cfg, &args.output)
}

/// Render a single reference for use by other subcommands.
pub fn render_one(reference: &str) -> anyhow::Result<declcfg::DeclarativeConfig> {
    let registry = NullRegistry;
    let render = sources::Render::new(&registry, vec![reference.to_string()]);
    let result = render.run(&CancellationToken::new());
    registry.destroy().ok();

    Ok(result.with_context(|| format!("failed to render {reference:?}"))?)
}
