//! Mock avatar interaction server
//!
//! Simulates the avatar service over a local WebSocket listener with a
//! scripted reply to the `start` request.

// Allow dead code in test infrastructure - not every test uses every helper
#![allow(dead_code)]

pub mod avatar_mock;

pub use avatar_mock::{AvatarMock, MockEvent, Reply};
