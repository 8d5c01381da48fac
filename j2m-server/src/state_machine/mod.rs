//! Explicit state machine gating when the queue may be drained.
//!
//! The design separates:
//! - **State**: connection status and whether a drain is running (`ConnectionState`)
//! - **Events**: what happened (`Event`)
//! - **Effects**: what to do (`Effect`)
//! - **Transition**: pure function `(State, Event) -> (State, Vec<Effect>)`
//!
//! The interpreter owns the only copy of the state, executes effects and
//! feeds their results back in as events.

pub mod effect;
pub mod event;
pub mod interpreter;
pub mod state;
pub mod transition;

pub use effect::*;
pub use event::*;
pub use interpreter::{spawn_safety_timer, ReplayHandle, ReplayMachine};
pub use state::*;
pub use transition::*;
