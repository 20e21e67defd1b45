//! Deterministic, pure logic shared by the loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod cache;
pub mod checklist;
pub mod decision;
pub mod feedback;
pub mod health;
pub mod machine;
pub mod parser;
pub mod relevance;
pub mod selection;
pub mod trim;
pub mod types;
