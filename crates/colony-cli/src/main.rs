mod args;
mod config;

use clap::Parser;
use owo_colors::OwoColorize;
use tracing::Level;

use colony::Supervisor;

#[tokio::main]
async fn main() {
	let cli = args::Cli::parse();

	let level = match cli.verbose {
		0 => Level::WARN,
		1 => Level::INFO,
		_ => Level::DEBUG,
	};
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(level)
		.init();

	let file_config = config::load_file_config();
	let sup_config = config::resolve(cli, file_config);

	if let Err(e) = run(sup_config).await {
		eprintln!("{} {}", "error:".red().bold(), e);
		std::process::exit(1);
	}
}

async fn run(config: colony::SupervisorConfig) -> colony::Result<()> {
	let mut sup = Supervisor::new(config)?;
	tracing::info!(
		"{}: {} processes from the Procfile",
		sup.title(),
		sup.entries().len()
	);
	sup.run_forever().await
}
