//! Store Module - record tables with commit semantics

pub mod database;

pub use database::{Database, Tables};
