use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("failed to read {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("Procfile line {line}: process name '{name}' is already defined")]
	DuplicateName { name: String, line: usize },
	#[error("no entries found in Procfile")]
	NoEntries,
	#[error("port for '{name}' would be {port}, which is above 65535")]
	PortOverflow { name: String, port: u32 },
	#[error("failed to install signal handler: {0}")]
	Signal(#[source] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
