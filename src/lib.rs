//! # clausemap
//!
//! Match compliance documents found in a folder tree to the clauses of a
//! standard (ISO 45001, ISNetworld, or any catalog you load), and keep a
//! revision history of what was found across repeated scans.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌─────────────┐   ┌─────────┐
//! │  Folder  │──▶│  Extract  │──▶│  Match   │──▶│  Reconcile  │──▶│ SQLite  │
//! │  walker  │   │ PDF/OOXML │   │ 3 scores │   │ doc + revs  │   │  store  │
//! └──────────┘   └───────────┘   └──────────┘   └─────────────┘   └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! clausemap init
//! clausemap catalog sample iso45001
//! clausemap scan ./Compliance_Documents --standard "ISO 45001"
//! clausemap score "ISO 45001"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction from PDF, DOCX, XLSX, and text files |
//! | [`keywords`] | Keyword extraction |
//! | [`similarity`] | Containment, gestalt ratio, and keyword Jaccard scores |
//! | [`matcher`] | Score a document against a clause catalog |
//! | [`scanner`] | Folder walk with a bounded worker pool |
//! | [`reconcile`] | Merge scan results into stored documents and revisions |
//! | [`store`] | Storage trait with SQLite and in-memory backends |
//! | [`catalog`] | Clause catalog files and bundled samples |
//! | [`compliance`] | Weighted compliance scoring |
//! | [`progress`] | Scan progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod catalog;
pub mod compliance;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod extract;
pub mod keywords;
pub mod matcher;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod scan_cmd;
pub mod scanner;
pub mod similarity;
pub mod stats;
pub mod store;
