//! Application layer - Generic services that use ports.

pub mod coordinator;
pub mod lifecycle;
pub mod sequencer;
pub mod watcher;
