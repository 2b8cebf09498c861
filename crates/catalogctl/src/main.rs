mod diff;
mod merge;
mod migrate;
mod output;
mod registry;
mod render;
mod validate;

use clap::Parser;

/// catalogctl maintains and transforms operator catalogs: rendering
/// disparate catalog sources to declarative config, diffing, merging, and
/// projecting catalogs back into their relational form.
#[derive(Debug, Parser)]
#[clap(author, name = "catalogctl", version)]
struct Catalogctl {
    /// Diagnostic filter for stderr logging; accepts any tracing directive,
    /// e.g. "info" or "diff=debug". Overridden by $CATALOGCTL_LOG.
    #[arg(long, global = true, default_value = "warn")]
    log_filter: String,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Subcommand {
    /// Render catalog references into declarative config
    Render(self::render::RenderArgs),
    /// Compute the minimal catalog between two references
    Diff(self::diff::DiffArgs),
    /// Union catalogs into one under a conflict policy
    Merge(self::merge::MergeArgs),
    /// Project a catalog into a relational database
    Migrate(self::migrate::MigrateArgs),
    /// Check that catalogs satisfy every model invariant
    Validate(self::validate::ValidateArgs),
}

// Diagnostics go to stderr so rendered catalogs on stdout stay clean.
fn init_logging(directives: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_env("CATALOGCTL_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .compact()
        .init();
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Catalogctl::parse();
    init_logging(&cli.log_filter);

    let result = match cli.subcommand {
        Subcommand::Render(args) => self::render::run(args),
        Subcommand::Diff(args) => self::diff::run(args),
        Subcommand::Merge(args) => self::merge::run(args),
        Subcommand::Migrate(args) => self::migrate::run(args),
        Subcommand::Validate(args) => self::validate::run(args),
    };
    if let Err(err) = result.as_ref() {
        tracing::error!(error = ?err, "subcommand failed");
    }
    result
}
