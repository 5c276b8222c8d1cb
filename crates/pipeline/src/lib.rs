//! The Weft prompt pipeline engine.
//!
//! A [`Pipeline`] is an ordered list of stages bound to one chat. Builder
//! calls schedule stages; [`Pipeline::execute`] runs them. Along the way the
//! engine:
//!
//! 1. **Selects** a context window for every submission under a token budget
//! 2. **Streams** the backend's reply into the chat
//! 3. **Runs tools** the backend asks for and resubmits with their results
//! 4. **Validates** responses and asks for corrections a bounded number of times
//! 5. **Stops** runaway pipelines by watching the stage trace for repetition
//!
//! Chats are saved when `execute` finishes, whether or not it succeeded.

pub mod builder;
pub mod engine;
pub mod expect;
pub mod loop_detector;
pub mod stage;
pub mod tools;
mod turn;
pub mod window;

pub use builder::render_template;
pub use engine::{Pipeline, SidebarOptions};
pub use expect::{Rejection, Validation, Validator, run_chain, validators};
pub use loop_detector::{LoopReport, detect_loop};
pub use stage::{FnStage, Stage, StageProcedure};
pub use tools::{FnTool, Tool, ToolRegistry};
pub use window::{BudgetWindow, LatestWindow, WindowSelector};
