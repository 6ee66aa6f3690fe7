//! streamchat - client for a token-streamed chat protocol
//!
//! Reconstructs a progressively updating transcript from a stream of typed
//! frames, one duplex connection per request.

pub mod buffer;
pub mod channel;
pub mod config;
pub mod history;
pub mod protocol;
pub mod runtime;
pub mod state_machine;
pub mod transcript;
