//! Task definitions
//!
//! Loading, validation, the name-keyed registry and `${{NAME}}` variable
//! binding.

pub mod loader;
pub mod registry;
pub mod types;
pub mod vars;

pub use loader::{load_dir, parse_task, script_task};
pub use registry::Registry;
pub use types::{Command, ConsoleId, Task};
pub use vars::{Scope, Variables};
