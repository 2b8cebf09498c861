use std::io::{self, Write};

#[derive(clap::Args, Clone, Debug, Default)]
pub struct Output {
    #[clap(short, long, value_enum)]
    pub output: Option<OutputType>,
}

#[derive(clap::ValueEnum, Debug, Copy, Clone, PartialEq)]
pub enum OutputType {
    /// Format output as a stream of YAML documents
    Yaml,
    /// Format output as concatenated JSON objects
    Json,
}

pub fn print_config(cfg: &declcfg::DeclarativeConfig, output: &Output) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    match output.output.unwrap_or(OutputType::Yaml) {
        OutputType::Yaml => declcfg::write_yaml(cfg, &mut stdout)?,
        OutputType::Json => declcfg::write_json(cfg, &mut stdout)?,
    }
    stdout.flush()?;
    Ok(())
}
