//! Mock speech servers for integration tests
//!
//! Speaks the binary frame protocol with raw byte layouts so the client codec
//! is checked against an independent implementation.

// Not every test binary uses every helper
#![allow(dead_code)]

pub mod speech_mock;
