use std::path::{Path, PathBuf};
use std::time::Duration;

use colony::procfile::split_names;
use colony::SupervisorConfig;
use serde::Deserialize;

use crate::args::Cli;

// ── Defaults file (~/.config/colony/config.toml) ────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
	pub port: Option<u16>,
	pub port_step: Option<u16>,
	pub timeout: Option<u64>,
	#[serde(default)]
	pub no_prefix: bool,
	#[serde(default)]
	pub print_timestamps: bool,
}

pub fn config_dir() -> PathBuf {
	if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|d| !d.is_empty()) {
		return PathBuf::from(dir).join("colony");
	}
	let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
	home.join(".config").join("colony")
}

pub fn load_file_config() -> FileConfig {
	load_file_config_from(&config_dir().join("config.toml"))
}

fn load_file_config_from(path: &Path) -> FileConfig {
	if !path.exists() {
		return FileConfig::default();
	}
	match std::fs::read_to_string(path) {
		Ok(content) => match toml::from_str(&content) {
			Ok(config) => return config,
			Err(e) => tracing::warn!("ignoring {}: {}", path.display(), e),
		},
		Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
	}
	FileConfig::default()
}

// ── Merging: flag/env > config file > built-in default ──────────────────────

pub fn resolve(cli: Cli, file: FileConfig) -> SupervisorConfig {
	let defaults = SupervisorConfig::default();

	let root = cli.root.unwrap_or_else(|| default_root(&cli.procfile));

	SupervisorConfig {
		title: cli.title,
		process_names: cli.processes.as_deref().map(split_names).unwrap_or_default(),
		root,
		port_base: cli.port.or(file.port).unwrap_or(defaults.port_base),
		port_step: cli.port_step.or(file.port_step).unwrap_or(defaults.port_step),
		timeout: cli.timeout.or(file.timeout).map(Duration::from_secs).unwrap_or(defaults.timeout),
		no_prefix: cli.no_prefix.unwrap_or(file.no_prefix),
		print_timestamps: cli.print_timestamps.unwrap_or(file.print_timestamps),
		procfile: cli.procfile,
	}
}

// Directory holding the Procfile; the current directory for stdin.
fn default_root(procfile: &Path) -> PathBuf {
	if procfile == Path::new("-") {
		return PathBuf::from(".");
	}
	let procfile = procfile.canonicalize().unwrap_or_else(|_| procfile.to_path_buf());
	match procfile.parent() {
		Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
		_ => PathBuf::from("."),
	}
}
