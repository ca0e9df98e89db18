//! Script running: splitting, execution and progress reporting.

pub mod console;
pub mod executor;
pub mod observer;
pub mod splitter;

pub use console::ConsoleObserver;
pub use executor::{ExecutorOptions, RunSummary, ScriptExecutor};
pub use observer::{
    NoopObserver, ObserverId, ObserverRegistry, RecordingObserver, ScriptEvent, ScriptObserver,
};
pub use splitter::{script_lines, SplitEvent, StatementSplitter, DEFAULT_DELIMITER};
