//! Operator Service Library Crate
//!
//! Connects one operator's voice-command session to the backend: the
//! websocket session channel, the REST client, the controller loop that owns
//! the interaction, and the console used by the `operator` binary.

pub mod backend;
pub mod channel;
pub mod config;
pub mod console;
pub mod controller;
