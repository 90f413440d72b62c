//! Conversation core integration tests
//!
//! Exercises the service against in-memory SQLite with recording subscribers:
//! exchanges, idempotent sends, failure isolation, ordering and fan-out.

#![allow(dead_code)]

mod common;
mod dedup;
mod exchange;
mod failures;
mod fanout;
mod ordering;
