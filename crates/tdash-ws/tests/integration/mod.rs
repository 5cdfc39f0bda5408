//! Integration test support for tdash-ws.

pub mod common;
