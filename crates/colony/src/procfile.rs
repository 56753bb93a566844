use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// One `name: command` line of a Procfile, with the port assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcfileEntry {
	pub name: String,
	pub command: String,
	pub port: u16,
}

/// Reads and parses a Procfile. A path of `-` reads standard input.
pub fn load(path: &Path, port_base: u16, port_step: u16, only: &[String]) -> Result<Vec<ProcfileEntry>> {
	let read_err = |source| Error::Read { path: path.to_path_buf(), source };

	let text = if path == Path::new("-") {
		let mut buf = String::new();
		std::io::stdin().read_to_string(&mut buf).map_err(read_err)?;
		buf
	} else {
		std::fs::read_to_string(path).map_err(read_err)?
	};

	parse(&text, port_base, port_step, only)
}

pub fn parse(text: &str, port_base: u16, port_step: u16, only: &[String]) -> Result<Vec<ProcfileEntry>> {
	let mut entries: Vec<ProcfileEntry> = Vec::new();
	let mut seen = HashSet::new();

	for (idx, raw) in text.lines().enumerate() {
		let Some((name, command)) = split_line(raw) else {
			continue;
		};

		if !only.is_empty() && !only.iter().any(|n| n == name) {
			continue;
		}

		if !seen.insert(name.to_string()) {
			return Err(Error::DuplicateName { name: name.to_string(), line: idx + 1 });
		}

		let port = port_base as u32 + entries.len() as u32 * port_step as u32;
		let port = u16::try_from(port).map_err(|_| Error::PortOverflow { name: name.to_string(), port })?;

		entries.push(ProcfileEntry {
			name: name.to_string(),
			command: command.to_string(),
			port,
		});
	}

	for wanted in only {
		if !seen.contains(wanted) {
			tracing::warn!("process '{}' is not defined in the Procfile", wanted);
		}
	}

	if entries.is_empty() {
		return Err(Error::NoEntries);
	}

	Ok(entries)
}

/// Splits a comma and/or whitespace separated list of process names.
pub fn split_names(list: &str) -> Vec<String> {
	list.split(|c: char| c == ',' || c.is_whitespace())
		.filter(|s| !s.is_empty())
		.map(str::to_string)
		.collect()
}

// `<name>:<whitespace><command>`, name limited to [A-Za-z0-9_-]
fn split_line(line: &str) -> Option<(&str, &str)> {
	let (name, rest) = line.split_once(':')?;
	if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
		return None;
	}
	if !rest.starts_with(char::is_whitespace) {
		return None;
	}
	let command = rest.trim();
	if command.is_empty() {
		return None;
	}
	Some((name, command))
}
