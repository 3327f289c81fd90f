//! Shared fakes and helpers for the station integration tests
//!
//! - fakes: scripted wipe helper, mutable inventory, fixed device probe
//! - harness: station construction and feed helpers
#![allow(dead_code)]

pub mod fakes;
pub mod harness;
