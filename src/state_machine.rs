//! Chat session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions: the
//! transition function maps (state, event) to a new state plus effects, and
//! the runtime executes the effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{ChatContext, ChatState, ReplyChannel};
pub use transition::{transition, TransitionError};
