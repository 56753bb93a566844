//! # colony
//!
//! Runs the processes of a Procfile as one supervised group.
//!
//! Every entry gets its own slot: the process runs under `/bin/sh -c` with
//! `PORT` set, its output is multiplexed onto one stream, and a slot whose
//! process exits with an error code is restarted after a second. The group
//! stops only when interrupted: every process is sent SIGINT, and whatever is
//! still alive after the grace period (or a second interrupt) gets SIGKILL.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use colony::{Supervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> colony::Result<()> {
//! let mut sup = Supervisor::new(SupervisorConfig {
//!     procfile: "Procfile".into(),
//!     root: ".".into(),
//!     ..Default::default()
//! })?;
//!
//! sup.run_forever().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod output;
pub mod process;
pub mod procfile;
pub mod supervisor;

pub use error::{Error, Result};
pub use output::{MultiOutput, OutputOptions, Record, Source};
pub use process::{ExitStatus, Process};
pub use procfile::ProcfileEntry;
pub use supervisor::{Supervisor, SupervisorConfig};
