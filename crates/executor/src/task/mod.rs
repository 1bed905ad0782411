//! Task contract and outcome observation

mod definition;
mod handle;

pub use definition::{SharedTask, Task, TaskError};
pub(crate) use handle::Completion;
pub use handle::{Outcome, TaskHandle};
