// ExiLead Scrape Pipeline Orchestrator - Core
//
// Drives the external job scraper and the database persistence program as a
// two-stage pipeline: a durable Postgres job queue, a cron trigger, a
// subprocess supervisor and a run-history ledger.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
