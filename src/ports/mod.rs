//! Ports - Trait definitions for the collaborators of a session.

pub mod prober;
pub mod storage;
pub mod transcoder;
