//! Common infrastructure for Stacki administrative tools.
//!
//! Tools such as the discovery daemon never mutate cluster state directly.
//! They drive the `stack` command line instead, so that every host change
//! goes through the same validation and plugin hooks an operator would hit:
//!
//! - [`shell`]: argv-based subprocess execution with captured output
//! - [`admin`]: the typed set of `stack` invocations and the
//!   [`AdminCommands`] seam used by the daemons
//! - [`error`]: error types shared by the above
//!
//! # Example
//!
//! ```ignore
//! use stack_common::{admin::{AdminCommand, AdminCommands, StackCli}, StackResult};
//!
//! async fn sync(cli: &StackCli) -> StackResult<bool> {
//!     let result = cli.execute(&AdminCommand::SyncConfig).await?;
//!     Ok(result.success())
//! }
//! ```

pub mod admin;
pub mod error;
pub mod shell;

// Re-export commonly used items at crate root
pub use admin::{get_attr, AdminCommand, AdminCommands, StackCli};
pub use error::{StackError, StackResult};
pub use shell::ExecResult;
