//! Market-validation run orchestrator.
//!
//! ## Module map
//!
//! | Module       | Role |
//! |--------------|------|
//! | `models`     | Run, stage, verdict and event types |
//! | `db`         | SQLite persistence behind [`db::DbHandle`] |
//! | `registry`   | Run state machine with per-run serialized transitions |
//! | `broadcast`  | Per-run progress pub/sub, no replay |
//! | `capability` | [`capability::AnalysisCapability`] and its implementations |
//! | `pipeline`   | Stage ordering, context bounding, artifact recording |
//! | `revision`   | One-shot revision tail on a NO/HOLD review |
//! | `report`     | Report storage and markdown composition |
//! | `store`      | Per-run artifact folder on disk |
//! | `api`, `sse`, `ws`, `server` | HTTP boundary |
//!
//! A run moves `queued → pregate_checking → researching → analyzing →
//! generating_report → completed`, with `pregate_failed` and `failed` as the
//! other terminal states.

pub mod api;
pub mod broadcast;
pub mod capability;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod revision;
pub mod server;
pub mod sse;
pub mod store;
pub mod ws;
