use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::output::{color_for, MultiOutput, OutputOptions};
use crate::process::Process;
use crate::procfile::{self, ProcfileEntry};

/// Pause between a failed exit and the relaunch of the same slot.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
	/// Display name; the basename of `root` when unset.
	pub title: Option<String>,
	pub procfile: PathBuf,
	/// Run only these processes; empty means all of them.
	pub process_names: Vec<String>,
	pub root: PathBuf,
	pub port_base: u16,
	pub port_step: u16,
	/// Grace period between the interrupt broadcast and the kill broadcast.
	pub timeout: Duration,
	pub no_prefix: bool,
	pub print_timestamps: bool,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			title: None,
			procfile: PathBuf::from("Procfile"),
			process_names: Vec::new(),
			root: PathBuf::from("."),
			port_base: 5000,
			port_step: 100,
			timeout: Duration::from_secs(5),
			no_prefix: false,
			print_timestamps: false,
		}
	}
}

impl SupervisorConfig {
	pub fn output_options(&self) -> OutputOptions {
		OutputOptions {
			print_name: !self.no_prefix,
			print_timestamp: self.print_timestamps,
		}
	}

	pub fn resolved_title(&self) -> String {
		if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
			return title.to_string();
		}
		let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
		root.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_else(|| "colony".to_string())
	}
}

/// Runs every Procfile entry in its own slot until the group is interrupted.
///
/// Slot `i` always runs `entries[i]` with palette color `i`. The dispatch loop
/// is the only writer of `procs`; process tasks report back over a channel
/// sized to the slot count.
pub struct Supervisor {
	title: String,
	root: PathBuf,
	entries: Vec<ProcfileEntry>,
	procs: Vec<Arc<Process>>,
	output: MultiOutput,
	timeout: Duration,
	restart_delay: Duration,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig) -> Result<Self> {
		let entries = procfile::load(
			&config.procfile,
			config.port_base,
			config.port_step,
			&config.process_names,
		)?;
		let output = MultiOutput::stdout(config.output_options());
		Ok(Self::from_entries(&config, entries, output))
	}

	pub fn from_entries(config: &SupervisorConfig, entries: Vec<ProcfileEntry>, output: MultiOutput) -> Self {
		let procs = entries
			.iter()
			.enumerate()
			.map(|(slot, entry)| {
				output.register(&entry.name);
				Arc::new(Process::new(entry, color_for(slot), config.root.clone(), output.clone()))
			})
			.collect();

		Self {
			title: config.resolved_title(),
			root: config.root.clone(),
			entries,
			procs,
			output,
			timeout: config.timeout,
			restart_delay: RESTART_DELAY,
		}
	}

	pub fn title(&self) -> &str {
		&self.title
	}

	pub fn entries(&self) -> &[ProcfileEntry] {
		&self.entries
	}

	/// Current process of every slot, parallel to `entries()`.
	pub fn processes(&self) -> &[Arc<Process>] {
		&self.procs
	}

	pub fn output(&self) -> &MultiOutput {
		&self.output
	}

	/// Runs until SIGINT or SIGTERM, then shuts the group down. A second
	/// signal during the grace period kills everything at once.
	pub async fn run_forever(&mut self) -> Result<()> {
		let mut sigint = signal(SignalKind::interrupt()).map_err(Error::Signal)?;
		let mut sigterm = signal(SignalKind::terminate()).map_err(Error::Signal)?;
		let (tx, rx) = mpsc::unbounded_channel();

		let forwarder = tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = sigint.recv() => tracing::debug!("received SIGINT"),
					_ = sigterm.recv() => tracing::debug!("received SIGTERM"),
				}
				if tx.send(()).is_err() {
					break;
				}
			}
		});

		let mut stdout = std::io::stdout();
		if stdout.is_terminal() {
			let _ = write!(stdout, "\x1b]0;{} | colony\x07", self.title);
			let _ = stdout.flush();
		}

		self.run(rx).await;
		forwarder.abort();
		Ok(())
	}

	/// Starts every slot and supervises them until `interrupts` yields (or
	/// closes), then interrupts, waits out the grace period and kills. Returns
	/// once every process task has finished.
	pub async fn run(&mut self, mut interrupts: mpsc::UnboundedReceiver<()>) {
		let (done_tx, mut done_rx) = mpsc::channel(self.procs.len().max(1));
		let mut tasks = JoinSet::new();

		tracing::info!("starting {} processes for {}", self.procs.len(), self.title);
		for slot in 0..self.procs.len() {
			self.launch(slot, &done_tx, &mut tasks);
		}

		self.dispatch(&mut done_rx, &mut interrupts, &done_tx, &mut tasks).await;
		self.shutdown(&mut interrupts).await;

		while tasks.join_next().await.is_some() {}
		tracing::info!("all processes stopped");
	}

	// Replaces the slot's process with a fresh one and runs it.
	fn launch(&mut self, slot: usize, done: &mpsc::Sender<usize>, tasks: &mut JoinSet<()>) {
		let proc = Arc::new(Process::new(
			&self.entries[slot],
			color_for(slot),
			self.root.clone(),
			self.output.clone(),
		));
		self.procs[slot] = Arc::clone(&proc);

		let done = done.clone();
		tasks.spawn(async move {
			proc.run().await;
			let _ = done.send(slot).await;
		});
	}

	async fn dispatch(
		&mut self,
		done_rx: &mut mpsc::Receiver<usize>,
		interrupts: &mut mpsc::UnboundedReceiver<()>,
		done_tx: &mpsc::Sender<usize>,
		tasks: &mut JoinSet<()>,
	) {
		loop {
			tokio::select! {
				Some(slot) = done_rx.recv() => {
					let proc = Arc::clone(&self.procs[slot]);
					let Some(status) = proc.exit_status() else {
						continue;
					};
					if !status.is_failure() {
						tracing::debug!("{} finished with {:?}, not restarting", proc.name(), status);
						continue;
					}

					self.output.write_status(proc.source(), "Restarting...").await;
					tracing::info!("restarting {} after {:?}", proc.name(), status);

					tokio::select! {
						_ = tokio::time::sleep(self.restart_delay) => self.launch(slot, done_tx, tasks),
						_ = interrupts.recv() => return,
					}
				}
				_ = interrupts.recv() => return,
			}
		}
	}

	async fn shutdown(&self, interrupts: &mut mpsc::UnboundedReceiver<()>) {
		tracing::info!("interrupting processes, grace period {:?}", self.timeout);
		let mut interrupting = JoinSet::new();
		for proc in &self.procs {
			let proc = Arc::clone(proc);
			interrupting.spawn(async move { proc.interrupt().await });
		}

		tokio::select! {
			_ = tokio::time::sleep(self.timeout) => tracing::debug!("grace period elapsed"),
			_ = interrupts.recv() => tracing::debug!("interrupted again, killing now"),
		}
		// every interrupt is delivered before the first kill
		while interrupting.join_next().await.is_some() {}

		tracing::info!("killing processes");
		let mut killing = JoinSet::new();
		for proc in &self.procs {
			let proc = Arc::clone(proc);
			killing.spawn(async move { proc.kill().await });
		}
		while killing.join_next().await.is_some() {}
	}
}
