use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::output::{MultiOutput, Source};
use crate::procfile::ProcfileEntry;

const SHELL: &str = "/bin/sh";
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
	Code(i32),
	Signal(i32),
	/// The process could not be spawned or waited on.
	Failed,
}

impl ExitStatus {
	/// Only an error exit is restarted; a clean exit or a signal is final.
	pub fn is_failure(&self) -> bool {
		match self {
			ExitStatus::Code(code) => *code > 0,
			ExitStatus::Signal(_) => false,
			ExitStatus::Failed => true,
		}
	}
}

impl From<std::process::ExitStatus> for ExitStatus {
	fn from(status: std::process::ExitStatus) -> Self {
		match (status.code(), status.signal()) {
			(Some(code), _) => ExitStatus::Code(code),
			(None, Some(sig)) => ExitStatus::Signal(sig),
			(None, None) => ExitStatus::Failed,
		}
	}
}

#[derive(Default)]
struct State {
	pid: Option<u32>,
	exit: Option<ExitStatus>,
	killed: bool,
}

impl State {
	fn running_pid(&self) -> Option<u32> {
		match (self.pid, self.exit) {
			(Some(pid), None) => Some(pid),
			_ => None,
		}
	}
}

/// One child process, started at most once. A restart builds a new `Process`.
pub struct Process {
	source: Source,
	command: String,
	root: PathBuf,
	port: u16,
	output: MultiOutput,
	state: Mutex<State>,
}

impl Process {
	pub fn new(entry: &ProcfileEntry, color: u8, root: PathBuf, output: MultiOutput) -> Self {
		Self {
			source: Source::new(entry.name.clone(), color),
			command: entry.command.clone(),
			root,
			port: entry.port,
			output,
			state: Mutex::new(State::default()),
		}
	}

	pub fn name(&self) -> &str {
		&self.source.name
	}

	pub fn color(&self) -> u8 {
		self.source.color
	}

	pub fn source(&self) -> &Source {
		&self.source
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn pid(&self) -> Option<u32> {
		self.state().pid
	}

	pub fn exit_status(&self) -> Option<ExitStatus> {
		self.state().exit
	}

	pub fn is_running(&self) -> bool {
		self.state().running_pid().is_some()
	}

	/// Spawns the command and waits for it to exit.
	pub async fn run(&self) -> ExitStatus {
		let mut cmd = Command::new(SHELL);
		cmd.args(["-c", &self.command])
			.current_dir(&self.root)
			.env("PORT", self.port.to_string())
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0);

		let mut child = match cmd.spawn() {
			Ok(c) => c,
			Err(e) => {
				tracing::warn!("failed to spawn {}: {}", self.source.name, e);
				self.output.write_status(&self.source, &format!("Failed to start: {}", e)).await;
				return self.finish(ExitStatus::Failed);
			}
		};

		let pid = child.id();
		{
			let mut state = self.state();
			state.pid = pid;
			// kill() raced the spawn
			if state.killed {
				if let Some(pid) = pid {
					signal_group(pid, Signal::SIGKILL);
				}
			}
		}

		self.output.write_status(&self.source, "Running...").await;
		tracing::debug!("{} started (pid {:?}, port {})", self.source.name, pid, self.port);

		let stdout = child.stdout.take().map(|r| tokio::spawn(pump(r, self.output.clone(), self.source.clone())));
		let stderr = child.stderr.take().map(|r| tokio::spawn(pump(r, self.output.clone(), self.source.clone())));

		let status = match child.wait().await {
			Ok(s) => ExitStatus::from(s),
			Err(e) => {
				tracing::warn!("failed to wait on {}: {}", self.source.name, e);
				ExitStatus::Failed
			}
		};
		// the group leader is gone; signals from here on have nothing to reach
		self.finish(status);

		// a grandchild may hold the pipes open; don't wait on it forever
		let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
			for handle in [stdout, stderr].into_iter().flatten() {
				let _ = handle.await;
			}
		})
		.await;

		let notice = match status {
			ExitStatus::Code(0) => "Process exited".to_string(),
			ExitStatus::Code(code) => format!("Process exited with code {}", code),
			ExitStatus::Signal(sig) => format!("Process terminated by signal {}", sig),
			ExitStatus::Failed => "Process lost".to_string(),
		};
		self.output.write_status(&self.source, &notice).await;
		tracing::debug!("{} finished: {:?}", self.source.name, status);

		status
	}

	/// Asks the process group to stop (SIGINT). No-op unless running.
	pub async fn interrupt(&self) {
		let Some(pid) = self.state().running_pid() else {
			return;
		};
		self.output.write_status(&self.source, "Interrupting...").await;
		signal_group(pid, Signal::SIGINT);
	}

	/// Forces the process group down (SIGKILL). No-op unless running.
	pub async fn kill(&self) {
		let pid = {
			let mut state = self.state();
			state.killed = true;
			state.running_pid()
		};
		let Some(pid) = pid else {
			return;
		};
		self.output.write_status(&self.source, "Killing...").await;
		signal_group(pid, Signal::SIGKILL);
	}

	fn finish(&self, status: ExitStatus) -> ExitStatus {
		self.state().exit = Some(status);
		status
	}

	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

async fn pump<R: AsyncRead + Unpin>(reader: R, output: MultiOutput, source: Source) {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::with_capacity(256);
	loop {
		buf.clear();
		match reader.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => {
				while matches!(buf.last(), Some(b'\n' | b'\r')) {
					buf.pop();
				}
				output.write_line(&source, &buf).await;
			}
			Err(e) => {
				tracing::debug!("output pipe for {} closed: {}", source.name, e);
				break;
			}
		}
	}
}

fn signal_group(pid: u32, signal: Signal) {
	if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
		tracing::debug!("{} to process group {} failed: {}", signal, pid, e);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::output::OutputOptions;

	fn process(command: &str) -> Process {
		let entry = ProcfileEntry { name: "job".into(), command: command.into(), port: 5300 };
		let output = MultiOutput::new(OutputOptions::default(), std::io::sink());
		Process::new(&entry, 4, std::env::temp_dir(), output)
	}

	#[test]
	fn only_error_exits_are_failures() {
		assert!(!ExitStatus::Code(0).is_failure());
		assert!(ExitStatus::Code(1).is_failure());
		assert!(ExitStatus::Code(255).is_failure());
		assert!(!ExitStatus::Code(-1).is_failure());
		assert!(!ExitStatus::Signal(9).is_failure());
		assert!(ExitStatus::Failed.is_failure());
	}

	#[test]
	fn converts_std_exit_status() {
		assert_eq!(ExitStatus::from(std::process::ExitStatus::from_raw(0)), ExitStatus::Code(0));
		assert_eq!(ExitStatus::from(std::process::ExitStatus::from_raw(3 << 8)), ExitStatus::Code(3));
		assert_eq!(ExitStatus::from(std::process::ExitStatus::from_raw(9)), ExitStatus::Signal(9));
	}

	#[tokio::test]
	async fn run_reports_exit_code_and_output() {
		let p = process("echo out-$PORT; echo err >&2; exit 3");
		assert!(!p.is_running());
		assert_eq!(p.run().await, ExitStatus::Code(3));
		assert_eq!(p.exit_status(), Some(ExitStatus::Code(3)));
		assert!(p.pid().is_some());

		let lines: Vec<String> = p.output.snapshot().await.iter().map(|r| r.text()).collect();
		assert!(lines.contains(&"out-5300".to_string()), "{:?}", lines);
		assert!(lines.contains(&"err".to_string()), "{:?}", lines);
		assert_eq!(lines.first().map(String::as_str), Some("Running..."));
		assert_eq!(lines.last().map(String::as_str), Some("Process exited with code 3"));
	}

	#[tokio::test]
	async fn signals_are_no_ops_before_start_and_after_exit() {
		let p = process("true");
		p.interrupt().await;
		assert_eq!(p.run().await, ExitStatus::Code(0));
		p.interrupt().await;
		p.kill().await;
		let lines: Vec<String> = p.output.snapshot().await.iter().map(|r| r.text()).collect();
		assert!(!lines.iter().any(|l| l == "Interrupting..." || l == "Killing..."));
	}

	#[tokio::test]
	async fn exit_is_recorded_before_output_drains() {
		// the background sleep keeps stdout open past the shell's exit
		let p = std::sync::Arc::new(process("sleep 1 & exit 0"));
		let runner = {
			let p = p.clone();
			tokio::spawn(async move { p.run().await })
		};
		let pid = loop {
			if let Some(pid) = p.pid() {
				break pid;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		};
		tokio::time::sleep(Duration::from_millis(100)).await;

		assert!(!p.is_running());
		assert_eq!(p.exit_status(), Some(ExitStatus::Code(0)));
		p.kill().await;
		p.interrupt().await;

		let status = tokio::time::timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
		assert_eq!(status, ExitStatus::Code(0));
		let lines: Vec<String> = p.output.snapshot().await.iter().map(|r| r.text()).collect();
		assert!(!lines.iter().any(|l| l == "Interrupting..." || l == "Killing..."), "{:?}", lines);
		assert_eq!(lines.last().map(String::as_str), Some("Process exited"));
		signal_group(pid, Signal::SIGKILL);
	}

	#[tokio::test]
	async fn kill_before_spawn_kills_on_start() {
		let p = std::sync::Arc::new(process("sleep 30"));
		p.kill().await;
		let status = tokio::time::timeout(Duration::from_secs(5), p.run()).await.unwrap();
		assert_eq!(status, ExitStatus::Signal(9));
	}

	#[tokio::test]
	async fn interrupt_reaches_the_process_group() {
		let p = std::sync::Arc::new(process("sleep 30"));
		let runner = {
			let p = p.clone();
			tokio::spawn(async move { p.run().await })
		};
		while !p.is_running() {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		p.interrupt().await;
		let status = tokio::time::timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
		assert_eq!(status, ExitStatus::Signal(2));
		assert!(!status.is_failure());
	}
}
