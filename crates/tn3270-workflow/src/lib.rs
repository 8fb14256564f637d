//! # tn3270-workflow
//!
//! The workflow execution engine:
//! - The declarative workflow model and its JSON configuration format
//! - The line-oriented input-file transpiler
//! - The control-port allocator
//! - The screen-dump output sink
//! - The workflow executor (one emulator instance per run)
//! - The ramp-up scheduler (bounded concurrent executions under a
//!   wall-clock deadline)

pub mod executor;
pub mod model;
pub mod output;
pub mod ports;
pub mod scheduler;
pub mod transpile;

pub use executor::{RunReport, WorkflowExecutor, WorkflowOutcome};
pub use model::{Coordinates, RawStep, Step, Workflow, WorkflowConfig};
pub use output::OutputSink;
pub use ports::PortAllocator;
pub use scheduler::{RampUpOptions, RampUpScheduler, WorkflowRunner};
