use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(name = "colony", version, about = "Run every process in a Procfile as one supervised group")]
pub struct Cli {
	/// Procfile to run ("-" reads it from stdin)
	#[arg(env = "COLONY_PROCFILE", default_value = "Procfile")]
	pub procfile: PathBuf,

	/// Title shown in the terminal; defaults to the root directory's name
	#[arg(short = 'T', long, env = "COLONY_TITLE")]
	pub title: Option<String>,

	/// Only run these processes (comma or space separated)
	#[arg(short = 'l', long, env = "COLONY_PROCESSES")]
	pub processes: Option<String>,

	/// Working directory; defaults to the directory containing the Procfile
	#[arg(short = 'd', long, env = "COLONY_ROOT")]
	pub root: Option<PathBuf>,

	/// Port handed to the first process [default: 5000]
	#[arg(short = 'p', long, env = "COLONY_PORT")]
	pub port: Option<u16>,

	/// Port increment between processes [default: 100]
	#[arg(short = 'P', long, env = "COLONY_PORT_STEP")]
	pub port_step: Option<u16>,

	/// Seconds processes get to exit after an interrupt before being killed [default: 5]
	#[arg(short = 't', long, env = "COLONY_TIMEOUT")]
	pub timeout: Option<u64>,

	/// Don't prefix lines with the process name (--no-prefix=false overrides the config file)
	#[arg(
		long,
		env = "COLONY_NO_PREFIX",
		num_args = 0..=1,
		require_equals = true,
		default_missing_value = "true",
		value_parser = BoolishValueParser::new()
	)]
	pub no_prefix: Option<bool>,

	/// Prefix lines with the time they were printed
	#[arg(
		long,
		env = "COLONY_PRINT_TIMESTAMPS",
		num_args = 0..=1,
		require_equals = true,
		default_missing_value = "true",
		value_parser = BoolishValueParser::new()
	)]
	pub print_timestamps: Option<bool>,

	/// Log supervisor activity to stderr (-v info, -vv debug)
	#[arg(short, long, action = ArgAction::Count)]
	pub verbose: u8,
}
