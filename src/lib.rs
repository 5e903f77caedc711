//! # statement-ingest
//!
//! Resumable bulk ingestion of financial statements for a universe of listed
//! securities.
//!
//! A bounded pool of workers fetches each security's statements from the
//! upstream API and upserts them into SQLite. Every outcome is checkpointed
//! to a progress file, so an interrupted run picks up where it stopped.
//! Upstream rate limits are respected with batch pauses, retries with
//! backoff, and a per-call timeout.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod progress;
pub mod queue;
pub mod repository;
pub mod source;
pub mod summary;
pub mod telemetry;
pub mod universe;
