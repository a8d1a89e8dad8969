#![doc = "pipeline-ledger-core: incremental processing of a content store's inputs into outputs."]

//! This crate contains the store-agnostic core of pipeline-ledger: the processing ledger,
//! ignore list, dependency graph recorder, progress estimator and the orchestration that
//! ties them together. Concrete stores and transformers live with their callers and plug in
//! through the traits in [`contract`].
//!
//! # Usage
//! Build a [`config::JobConfig`], pick a [`contract::ContentStore`] and a
//! [`contract::Transformer`], and call [`synchronise::synchronise`] once per run.

pub mod config;
pub mod contract;
pub mod dependency;
pub mod error;
pub mod ignore;
pub mod ledger;
pub mod memory;
pub mod path;
pub mod progress;
pub mod synchronise;
