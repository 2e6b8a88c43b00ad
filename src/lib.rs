//! neuromap: a neuroimaging meta-analysis web service.
//!
//! Exposes a corpus of studies, activation peaks and term features over a
//! JSON API, with lazily created canonical grid locations whose derived
//! images (coactivation, functional connectivity, decodings) are produced
//! by an external analysis tool behind an asynchronous task queue.

pub mod assets;
pub mod cache;
pub mod config;
pub mod database;
pub mod errors;
pub mod images;
pub mod ingest;
pub mod locations;
pub mod models;
pub mod spatial;
pub mod tasks;
pub mod web;
