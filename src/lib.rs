//! # nodectl
//!
//! Drive the line-oriented command consoles of simulated or containerized
//! network devices from async Rust.
//!
//! A [`Session`] owns one device's console. It launches the device through a
//! [`Launcher`], waits for the prompt, and then runs one command at a time:
//! the command is written, its echo consumed, and response lines collected
//! until the device prints `Done` or `Error N: message`. Device log lines and
//! blank lines never reach the response body. Every wait is bounded.
//!
//! Time in a simulated network is virtual. Sessions share a
//! [`VirtualClock`]; the driver advances it after each command and pumps it
//! while waiting for output, so devices scheduled on the clock make progress.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use nodectl::{CommandSpec, PtyLauncher, RunConfig, Testbed, WallClock};
//! use nodectl::decode::Table;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let run = RunConfig::from_env();
//!     let launcher = PtyLauncher::new(run.apply(CommandSpec::new("ot-cli-ftd").arg("{node}")));
//!     let mut testbed = Testbed::new(run, Arc::new(WallClock::new()));
//!
//!     let leader = testbed.add_node(&launcher).await?;
//!     leader.command("ifconfig up").await?;
//!     leader.command("thread start").await?;
//!
//!     let children = Table::keyed(&leader.command("child table").await?);
//!     println!("{} children", children.len());
//!
//!     testbed.shutdown_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Structured output
//!
//! The [`decode`] module turns response bodies into typed records: column
//! tables, hierarchical blocks, `key: value` blocks and counter blocks.
//! Malformed lines are skipped and logged, never fatal.
//!
//! ## Scripts
//!
//! The `nodectl` binary runs line scripts against one device:
//!
//! | Step | Description |
//! |------|-------------|
//! | `send "cmd"` | Run a command and wait for `Done` |
//! | `expect "regex" [2s]` | Wait for a whole output line matching `regex` (5 s default) |
//! | `result "cmd" "regex"` | Run a command; exactly one body line must match |
//! | `poll "cmd" "regex" within 30s [every 1s]` | Re-run a command until a body line matches |
//! | `rows "cmd" N` | Run a command; its body must be a table with `N` rows |
//! | `advance 500ms` | Advance the virtual clock |
//! | `# comment` | Full-line or trailing comment |

pub mod channel;
pub mod clock;
pub mod config;
pub mod decode;
pub mod error;
pub mod launch;
pub mod parser;
pub mod pattern;
pub mod runner;
pub mod session;
pub mod step;
pub mod steps;
pub mod testbed;
pub mod transaction;

pub use channel::{DeviceEnd, LineChannel, MemoryChannel, ReadLine, memory_pair};
pub use clock::{LogicalClock, Ticks, VirtualClock, WallClock};
pub use config::{RunConfig, SessionConfig};
pub use error::{ParseSkipped, SessionError, SessionResult};
pub use launch::{
    CommandProbe, CommandSpec, ContainerLauncher, FnProbe, Launcher, LivenessProbe, MemoryLauncher,
    ProcessLauncher, PtyLauncher,
};
pub use parser::{Args, parse_file, parse_str};
pub use pattern::{Pattern, PatternSet};
pub use runner::Runner;
pub use session::{NodeId, Session, SessionState};
pub use step::{Step, StepContext};
pub use testbed::Testbed;
pub use transaction::{Outcome, SendAdvance, TransactionOptions, TransactionResult};
