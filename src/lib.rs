//! # Docsense
//!
//! A retrieval-augmented document intelligence pipeline with spreadsheet
//! analytics.
//!
//! Docsense ingests documents (text, PDF, spreadsheet workbooks),
//! analyzes tabular data for KPIs, trends, and anomalies, chunks and
//! embeds the extracted narratives, and answers questions grounded in a
//! user's own documents with per-source provenance and a confidence
//! score.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────────┐
//! │  Extractor   │──▶│   Segmenter   │──▶│ Embed + Index │
//! │ txt/pdf/xlsx │   │ overlap chunks│   │  (per chunk)  │
//! └──────┬───────┘   └───────────────┘   └───────┬───────┘
//!        │ tabular                               │
//!        ▼                                       ▼
//! ┌──────────────┐                       ┌───────────────┐
//! │   Tabular    │      question ──────▶ │ Retrieve/Rank │
//! │   Analyzer   │                       │  + Compose    │
//! └──────────────┘                       └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`segment`] | Overlapping-window text segmentation |
//! | [`table`] | Typed sheet/column model |
//! | [`tabular`] | KPI, trend, anomaly, and insight analysis |
//! | [`numeric`] | Statistics primitives |
//! | [`extract`] | Multi-format document extraction |
//! | [`embedding`] | Embedding service abstraction |
//! | [`generation`] | Text-generation service abstraction |
//! | [`index`] | Vector index abstraction |
//! | [`store`] | Relational store abstraction |
//! | [`retrieve`] | Similarity ranking and context assembly |
//! | [`compose`] | Personas, prompting, confidence |
//! | [`pipeline`] | Ingestion and question answering |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`stats`] | Per-user statistics command |

pub mod compose;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod index;
pub mod migrate;
pub mod models;
pub mod numeric;
pub mod pipeline;
pub mod retrieve;
pub mod segment;
pub mod server;
pub mod stats;
pub mod store;
pub mod table;
pub mod tabular;
