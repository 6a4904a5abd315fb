//! Document OCR service
//!
//! Uploaded documents are recognized by an ordered chain of engines: a cloud
//! vision model first, then a local OCR engine. The first tier to succeed
//! wins and its result is persisted to the configured document store.

pub mod confidence;
pub mod config;
pub mod engine;
pub mod engines;
pub mod error;
pub mod preprocessing;
pub mod resolver;
pub mod server;
pub mod store;
