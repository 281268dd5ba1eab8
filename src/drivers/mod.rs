//! Device interfaces used by the process layer
//!
//! The console, keyboard and power switch are owned by the surrounding
//! kernel. This crate only talks to them through the traits re-exported
//! here, and never blocks while holding a lock that a device callback
//! could need.

pub mod console;

pub use console::{Console, Keyboard, Power};
