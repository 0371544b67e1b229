//! Remote event counter firmware, hardware-independent core.
//!
//! Everything here is pure logic: the persisted configuration document,
//! the reporting state machine and its request building, the web console
//! routing, and the status indicator cadence. The hardware glue (Wi-Fi,
//! TLS transport, flash, GPIO) lives in the binary behind the `esp32`
//! feature so this part builds and tests on the host.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod constants;
pub mod page;
pub mod report;
pub mod status;
