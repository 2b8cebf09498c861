use anyhow::Context;

use crate::render::render_one;

/// Check that a catalog satisfies every model invariant.
#[derive(Debug, clap::Args)]
pub struct ValidateArgs {
    /// Catalog references to validate
    #[clap(required = true)]
    refs: Vec<String>,
}

pub fn run(args: ValidateArgs) -> anyhow::Result<()> {
    for reference in &args.refs {
        let cfg = render_one(reference)?;
        declcfg::convert_to_model(&cfg)
            .with_context(|| format!("reference {reference:?} is not a valid catalog"))?;
        tracing::debug!(reference, "catalog is valid");
    }
    Ok(())
}
