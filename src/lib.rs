//! Client for a realtime room chat service: auth over HTTP, a Socket.IO
//! connection for room traffic, and the state the chat window renders.

pub mod api;
pub mod app;
pub mod chat;
pub mod error;
pub mod socket;
pub mod storage;

pub use error::{ChatError, Result};
