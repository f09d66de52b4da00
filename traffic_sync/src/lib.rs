//! Traffic analysis side of the pipeline.
//!
//! Captured tiles are classified into severity masks ([`classify`]), counted
//! into a local SQLite store ([`store`]), stitched into per-batch mosaics
//! ([`mosaic`]) and replicated to a remote database ([`replication`]).
//! [`pipeline`] wires these together with the capture crate.

pub mod cadence;
pub mod classify;
pub mod config;
pub mod db;
pub mod layout;
pub mod models;
pub mod mosaic;
pub mod pipeline;
pub mod png;
pub mod replication;
pub mod retention;
pub mod schema;
pub mod store;
