//! Session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.
//! The runtime feeds [`Event`]s in and executes the returned [`Effect`]s.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::{Event, FailureCause};
pub use state::{SessionContext, SessionState, ERROR_MESSAGE};
pub use transition::{transition, TransitionError, TransitionResult};
