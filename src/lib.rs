//! # Vault Sync
//!
//! Bidirectional synchronization between a vault of clinical complaint
//! documents (Markdown with a YAML header) and the relational store that
//! serves them to the application.
//!
//! The vault is where clinicians edit; the store is what the product reads.
//! A pull pushes vault edits into the store, a push renders store changes
//! back into the vault. A content hash over the canonical header and the
//! normalized body decides whether anything changed at all, and a
//! last-writer-wins rule with conflict artifacts protects concurrent edits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   pull   ┌──────────────┐   ┌───────────┐
//! │    Vault     │────────▶│ Orchestrators │──▶│   Store    │
//! │ Markdown+YAML│◀────────│ pull / push   │◀──│  SQLite    │
//! └──────┬──────┘   push   └──────▲───────┘   └───────────┘
//!        │ notify                  │
//!        ▼                         │
//!  ┌───────────┐  debounced runs   │      ┌──────────────┐
//!  │   Agent    │─────────────────┘─────▶│ GET /health  │
//!  └───────────┘                          └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sync init                  # create the store schema
//! sync validate              # lint every vault document
//! sync pull                  # vault → store
//! sync push --since 2025-01-01
//! sync watch                 # agent + health endpoint
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with `SYNC_*` environment overrides |
//! | [`error`] | Parse, store and run error types |
//! | [`models`] | Store records, patches, outcomes and run counters |
//! | [`document`] | Document parsing, sections and rendering |
//! | [`ebm`] | Evidence extraction from structured sections |
//! | [`hash`] | Canonical content hash and date normalization |
//! | [`mapper`] | Header ⇄ store field mapping |
//! | [`validate`] | Document validation and the `validate` command |
//! | [`vault`] | Vault scanning, atomic writes, conflict artifacts |
//! | [`store`] | Store trait and its SQLite, in-memory and retrying implementations |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema creation |
//! | [`retry`] | Backoff policy and timeouts |
//! | [`pull`] | Vault → store orchestrator |
//! | [`push`] | Store → vault orchestrator |
//! | [`health`] | Health monitor and HTTP endpoint |
//! | [`agent`] | File watcher, debounce and run scheduling |

pub mod agent;
pub mod config;
pub mod db;
pub mod document;
pub mod ebm;
pub mod error;
pub mod hash;
pub mod health;
pub mod mapper;
pub mod migrate;
pub mod models;
pub mod pull;
pub mod push;
pub mod retry;
pub mod store;
pub mod validate;
pub mod vault;
