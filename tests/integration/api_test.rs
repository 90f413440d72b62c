//! HTTP surface integration tests
//!
//! Drives the composed application router with `oneshot` requests.

#![allow(dead_code)]

mod http;
