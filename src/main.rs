use clap::Parser;
use pvsign::sign;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pvsign")]
#[command(about = "Fetch an unsigned PV driver package, authenticode-sign its binaries and repackage it")]
#[command(version)]
struct Cli {
    /// Directory that receives the signed <package>.tar
    output_dir: String,
    /// Package name, e.g. xenvif
    package: String,
    /// Release version to fetch, e.g. 9.1.0
    version: String,
    /// YAML file overriding endpoints and signing parameters
    #[arg(short, long)]
    config: Option<String>,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    sign::sign_package_cmd(&cli.output_dir, &cli.package, &cli.version, cli.config.as_deref())?;

    Ok(())
}
