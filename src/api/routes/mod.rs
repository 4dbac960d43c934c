//! API route modules.

pub mod recordings;
