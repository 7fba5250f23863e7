//! # Mailstash
//!
//! A local-first email indexing and semantic retrieval engine.
//!
//! Mailstash ingests messages and attachments from a mail source, chunks
//! and embeds their text, stores the vectors in SQLite, and answers
//! natural-language questions by retrieving the most relevant chunks and
//! grounding a generation step in them.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌───────────┐
//! │ MailSource │──▶│  Ingestion    │──▶│  SQLite   │
//! │ + BlobStore│   │ Chunk + Embed │   │  vectors  │
//! └────────────┘   └───────────────┘   └─────┬─────┘
//!                                            │
//!                          ┌─────────────────┤
//!                          ▼                 ▼
//!                    ┌───────────┐    ┌────────────┐
//!                    │ Retrieval │───▶│   Answer   │
//!                    │  engine   │    │  composer  │
//!                    └───────────┘    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mstash init                        # create database
//! mstash ingest inbox                # ingest a mailbox export
//! mstash search "travel receipts"    # semantic search
//! mstash ask "when is the offsite?"  # grounded answer
//! mstash embed pending               # backfill missing embeddings
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`providers`] | Collaborator traits (source, extractor, blobs, generation) |
//! | [`source_json`] | Mailbox-export mail source |
//! | [`blob_fs`] | Filesystem blob store |
//! | [`chunk`] | Boundary-aware text chunking |
//! | [`embedding`] | Embedding client: retry, backoff, concurrency cap |
//! | [`index`] | Document and vector index over SQLite |
//! | [`ingest`] | Ingestion orchestration and jobs |
//! | [`retrieval`] | Ranking and context assembly |
//! | [`answer`] | Grounded answer composition |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod blob_fs;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod providers;
pub mod retrieval;
pub mod source_json;
