//! Domain layer - Pure business logic.

pub mod artifact;
pub mod hls;
pub mod media;
pub mod progress;
pub mod session;
