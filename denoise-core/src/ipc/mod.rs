//! Types published to observers of a session (the demo's console, tests,
//! or any future UI).
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so they can be
//! forwarded as JSON unchanged.

pub mod events;
