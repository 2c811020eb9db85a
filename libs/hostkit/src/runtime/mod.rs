//! Service owner - drives every module through start and stop
//!
//! The owner fans `start`/`stop` out to all modules concurrently, shuts the
//! service down on the first start failure and publishes exactly one
//! [`ServiceExit`](crate::ServiceExit) on its exit channel.

mod builder;
mod exit;
mod owner;

pub use builder::ServiceOwnerBuilder;
pub use exit::{ExitFn, ExitReceiver};
pub use owner::ServiceOwner;

pub(crate) use owner::OwnerInner;
