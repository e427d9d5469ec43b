//! Copy-truncate log rotation for processes that never reopen their logs.
//!
//! A process holding an open descriptor keeps writing into whatever inode it
//! opened, so renaming its log achieves nothing. `loglife` instead owns a
//! descriptor on the same file, relays newly appended bytes into timestamped
//! output files, truncates the source in place, gzips closed outputs and
//! prunes old archives. Sweep targets delete aged files from a directory.
//!
//! # Library-First API
//!
//! - [`LogLife`]: registry plus scheduler, the usual entry point
//! - [`Registry`]: targets and the capabilities they share
//! - [`Scheduler`]: single-flight ticking with stall fail-stop
//! - [`rotate()`]: one-shot copy-truncate, no registry needed
//!
//! # Examples
//!
//! ```no_run
//! use loglife::{LogLife, TargetOptions, TargetSpec};
//! use std::time::Duration;
//!
//! # async fn example() -> loglife::Result<()> {
//! let engine = LogLife::new();
//! let options = TargetOptions {
//!     span: Some("1d".into()),
//!     cap: Some("100Mb".into()),
//!     stock: Some(7),
//!     ..Default::default()
//! };
//! engine
//!     .register(
//!         [
//!             TargetSpec::path("./log/app.log"),
//!             TargetSpec::record(
//!                 "old-logs",
//!                 TargetOptions {
//!                     directory: Some("./log/archive".into()),
//!                     ..Default::default()
//!                 },
//!             ),
//!         ],
//!         &options,
//!     )
//!     .await?;
//! engine.start(Some(Duration::from_secs(10)));
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod naming;
pub mod notify;
pub mod registry;
pub mod reliability;
pub mod renewal;
pub mod rotate;
pub mod scheduler;
pub mod source;
pub mod target;
pub mod units;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LogLifeConfig;
pub use engine::LogLife;
pub use error::{Error, Result};
pub use naming::{DefaultNamingPolicy, NamingPolicy, TargetView, YearDigits};
pub use notify::{Notifier, ReportOptions};
pub use registry::{Registry, RegistryBuilder};
pub use renewal::StreamWriter;
pub use rotate::{RotateOptions, RotateOutcome, rotate};
pub use scheduler::Scheduler;
pub use source::{FileSource, Source, SourceOpener};
pub use target::{
    Action, Phase, Readiness, StdStream, Target, TargetOptions, TargetSpec, TargetStats,
    TimePosition,
};
pub use units::Quantity;
