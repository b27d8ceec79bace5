//! Shared storage integration tests.
//!
//! Tests the MessageStore interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod message_store_tests;
