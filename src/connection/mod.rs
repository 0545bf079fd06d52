// src/connection/mod.rs

//! Manages the lifecycle of a single proxied client connection: frame
//! reading, dispatch, the upstream reply pump, and teardown.

mod handler;

pub use handler::SessionHandler;
