//! # Company Loader
//!
//! Bulk loader for the company registry extract.
//!
//! Streams a multi-gigabyte delimited file of company records into a SQLite
//! database: headers are mapped to logical fields, every record is
//! normalized into a [`models::Company`], and rows are upserted in fixed-size
//! transactional batches. A full-text search mirror is kept consistent with
//! the companies table for the read-only query service that sits on top.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐
//! │  Source  │──▶│  Mapper  │──▶│ Normalize │──▶│  Writer  │──▶│  SQLite  │
//! │ CSV/TSV  │   │ headers  │   │  Company  │   │ batches  │   │ + FTS5   │
//! └──────────┘   └──────────┘   └───────────┘   └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! coload init                                   # create database
//! coload import ./data/BasicCompanyData.csv     # full load
//! coload import ./data --continue               # resume after Ctrl-C
//! coload stats
//! coload search "acme widgets"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`models`] | Core data types |
//! | [`mapping`] | Header → logical field mapping |
//! | [`normalize`] | Record cleaning and typing |
//! | [`error`] | Row-level error taxonomy |
//! | [`source`] | Source discovery and record stream |
//! | [`store`] | Storage trait and in-memory backend |
//! | [`sqlite_store`] | SQLite storage backend |
//! | [`writer`] | Batched, transactional writes |
//! | [`progress`] | Counters, throughput and ETA reporting |
//! | [`mirror`] | Search mirror synchronization |
//! | [`ingest`] | Import pipeline |
//! | [`stats`] | Database statistics |

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod mapping;
pub mod migrate;
pub mod mirror;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod source;
pub mod sqlite_store;
pub mod stats;
pub mod store;
pub mod writer;
