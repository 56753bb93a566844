use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use owo_colors::{OwoColorize, Style, XtermColors};
use tokio::sync::broadcast;
use tokio::sync::Mutex;

/// xterm-256 color codes handed out to slots in order.
pub const PALETTE: [u8; 10] = [2, 3, 4, 5, 6, 42, 130, 103, 129, 108];

const RING_CAPACITY: usize = 1024;

pub fn color_for(slot: usize) -> u8 {
	PALETTE[slot % PALETTE.len()]
}

/// Identity a record is written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
	pub name: String,
	pub color: u8,
}

impl Source {
	pub fn new(name: impl Into<String>, color: u8) -> Self {
		Self { name: name.into(), color }
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
	pub source: String,
	pub line: Vec<u8>,
	/// Supervisor notices ("Running...", "Restarting...") rather than child output.
	pub status: bool,
}

impl Record {
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.line).into_owned()
	}
}

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
	pub print_name: bool,
	pub print_timestamp: bool,
}

impl Default for OutputOptions {
	fn default() -> Self {
		Self { print_name: true, print_timestamp: false }
	}
}

/// Serializes records from every process (and the supervisor) onto one sink.
#[derive(Clone)]
pub struct MultiOutput {
	inner: Arc<Mutex<Inner>>,
	name_width: Arc<AtomicUsize>,
	sender: broadcast::Sender<Record>,
	options: OutputOptions,
}

struct Inner {
	sink: Box<dyn Write + Send>,
	ring: VecDeque<Record>,
}

impl MultiOutput {
	pub fn new(options: OutputOptions, sink: impl Write + Send + 'static) -> Self {
		let (sender, _) = broadcast::channel(256);
		Self {
			inner: Arc::new(Mutex::new(Inner {
				sink: Box::new(sink),
				ring: VecDeque::with_capacity(RING_CAPACITY),
			})),
			name_width: Arc::new(AtomicUsize::new(0)),
			sender,
			options,
		}
	}

	pub fn stdout(options: OutputOptions) -> Self {
		Self::new(options, std::io::stdout())
	}

	/// Widens the name column so every registered name lines up.
	pub fn register(&self, name: &str) {
		self.name_width.fetch_max(name.len(), Ordering::Relaxed);
	}

	pub async fn write_line(&self, source: &Source, line: &[u8]) {
		self.write_record(source, line, false).await;
	}

	pub async fn write_status(&self, source: &Source, message: &str) {
		self.write_record(source, message.as_bytes(), true).await;
	}

	async fn write_record(&self, source: &Source, line: &[u8], status: bool) {
		let record = Record {
			source: source.name.clone(),
			line: line.to_vec(),
			status,
		};

		{
			let mut inner = self.inner.lock().await;
			let width = self.name_width.load(Ordering::Relaxed);
			let rendered = render(&self.options, width, source, &record);
			if let Err(e) = inner.sink.write_all(&rendered).and_then(|_| inner.sink.flush()) {
				tracing::debug!("output write failed: {}", e);
			}
			if inner.ring.len() >= RING_CAPACITY {
				inner.ring.pop_front();
			}
			inner.ring.push_back(record.clone());
		}

		let _ = self.sender.send(record);
	}

	/// The most recent records, oldest first.
	pub async fn snapshot(&self) -> Vec<Record> {
		let inner = self.inner.lock().await;
		inner.ring.iter().cloned().collect()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Record> {
		self.sender.subscribe()
	}
}

fn render(options: &OutputOptions, name_width: usize, source: &Source, record: &Record) -> Vec<u8> {
	let mut buf = Vec::with_capacity(record.line.len() + name_width + 16);

	if options.print_name {
		let padded = format!("{:<width$}", source.name, width = name_width.max(source.name.len()) + 1);
		let style = Style::new().color(XtermColors::from(source.color)).bold();
		buf.extend_from_slice(format!("{}| ", padded.style(style)).as_bytes());
	}

	if options.print_timestamp {
		let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
		buf.extend_from_slice(format!("{} ", stamp.dimmed()).as_bytes());
	}

	if record.status {
		buf.extend_from_slice(format!("{}", String::from_utf8_lossy(&record.line).bold()).as_bytes());
	} else {
		buf.extend_from_slice(&record.line);
	}
	buf.push(b'\n');
	buf
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(line: &str, status: bool) -> Record {
		Record { source: "web".into(), line: line.as_bytes().to_vec(), status }
	}

	fn strip_ansi(bytes: &[u8]) -> String {
		let text = String::from_utf8_lossy(bytes);
		let mut out = String::new();
		let mut chars = text.chars();
		while let Some(c) = chars.next() {
			if c == '\u{1b}' {
				for c in chars.by_ref() {
					if c == 'm' {
						break;
					}
				}
			} else {
				out.push(c);
			}
		}
		out
	}

	#[test]
	fn palette_is_cyclic() {
		assert_eq!(color_for(0), 2);
		assert_eq!(color_for(5), 42);
		assert_eq!(color_for(10), color_for(0));
		assert_eq!(color_for(13), PALETTE[3]);
	}

	#[test]
	fn render_pads_name_to_widest_plus_one() {
		let opts = OutputOptions { print_name: true, print_timestamp: false };
		let src = Source::new("web", 2);
		let out = render(&opts, 6, &src, &record("listening", false));
		assert_eq!(strip_ansi(&out), "web    | listening\n");
		assert!(out.starts_with(b"\x1b["));
	}

	#[test]
	fn render_without_prefix_is_payload_only() {
		let opts = OutputOptions { print_name: false, print_timestamp: false };
		let out = render(&opts, 6, &Source::new("web", 2), &record("raw bytes", false));
		assert_eq!(out, b"raw bytes\n");
	}

	#[test]
	fn render_timestamp_follows_name() {
		let opts = OutputOptions { print_name: true, print_timestamp: true };
		let out = strip_ansi(&render(&opts, 3, &Source::new("web", 2), &record("hi", false)));
		let (prefix, rest) = out.split_once("| ").unwrap();
		assert_eq!(prefix, "web ");
		let (stamp, payload) = rest.split_once(' ').unwrap();
		assert_eq!(stamp.len(), 8);
		assert_eq!(stamp.matches(':').count(), 2);
		assert_eq!(payload, "hi\n");
	}

	#[test]
	fn status_records_are_bold() {
		let opts = OutputOptions { print_name: false, print_timestamp: false };
		let out = render(&opts, 0, &Source::new("web", 2), &record("Restarting...", true));
		assert_ne!(out, b"Restarting...\n");
		assert_eq!(strip_ansi(&out), "Restarting...\n");
	}

	#[tokio::test]
	async fn snapshot_and_subscribe_see_records_in_order() {
		let out = MultiOutput::new(OutputOptions::default(), std::io::sink());
		let mut rx = out.subscribe();
		let web = Source::new("web", 2);
		out.register("web");
		out.write_line(&web, b"one").await;
		out.write_status(&web, "two").await;

		let snap = out.snapshot().await;
		assert_eq!(snap.len(), 2);
		assert_eq!(snap[0].text(), "one");
		assert!(!snap[0].status);
		assert!(snap[1].status);

		assert_eq!(rx.recv().await.unwrap().text(), "one");
		assert_eq!(rx.recv().await.unwrap().text(), "two");
	}

	#[tokio::test]
	async fn concurrent_writers_never_split_lines() {
		#[derive(Clone, Default)]
		struct Shared(Arc<std::sync::Mutex<Vec<u8>>>);
		impl Write for Shared {
			fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
				self.0.lock().unwrap().extend_from_slice(buf);
				Ok(buf.len())
			}
			fn flush(&mut self) -> std::io::Result<()> {
				Ok(())
			}
		}

		let sink = Shared::default();
		let out = MultiOutput::new(OutputOptions { print_name: false, print_timestamp: false }, sink.clone());
		let mut handles = Vec::new();
		for n in 0..8 {
			let out = out.clone();
			handles.push(tokio::spawn(async move {
				let src = Source::new(format!("p{}", n), color_for(n));
				for _ in 0..50 {
					out.write_line(&src, format!("line-from-{}", n).as_bytes()).await;
				}
			}));
		}
		for h in handles {
			h.await.unwrap();
		}

		let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
		let lines: Vec<&str> = text.lines().collect();
		assert_eq!(lines.len(), 400);
		assert!(lines.iter().all(|l| l.starts_with("line-from-") && l.len() == 11));
	}
}
