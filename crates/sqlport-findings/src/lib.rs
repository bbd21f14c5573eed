//! sqlport findings
//!
//! Turns raw static-analyzer output into conversion tasks:
//!
//! - [`FindingNormalizer`]: heterogeneous analyzer records → uniform [`Finding`] list
//! - [`TaskBuilder`]: findings → ordered, addressable [`ConversionTask`]s
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlport_findings::{FindingNormalizer, Granularity, TaskBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let findings = FindingNormalizer::new().load("findings.json").await?;
//! let tasks = TaskBuilder::new(Granularity::Method).build(findings);
//!
//! for task in &tasks {
//!     println!("{}", task.render_prompt());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod finding;
pub mod normalize;
pub mod task;

pub use error::FindingsError;
pub use finding::{ExpressionKind, Finding, Span};
pub use normalize::FindingNormalizer;
pub use task::{Block, ConversionTask, Granularity, TaskBuilder, TaskKey, TaskUnit};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
