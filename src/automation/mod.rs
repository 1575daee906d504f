pub mod builtin;
pub mod control;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod program;
pub mod queue;
pub mod script;

#[cfg(test)]
mod tests;

pub use builtin::TemplateTapProgram;
pub use control::{RunControl, RunSnapshot, RunState};
pub use engine::MacroEngine;
pub use error::{MacroError, MacroResult};
pub use interpreter::ScriptProgram;
pub use program::{MacroContext, MacroProgram, run_program};
pub use queue::{QueueControl, QueueItem};
pub use script::{FlowDirective, Script, Step, StepKind};
