//! Zentinel Mock Engine
//!
//! A deterministic engine that resolves a request against scenario mocks
//! and produces exactly one response. Transport, URL parameter extraction
//! and delay enactment belong to the caller.
//!
//! # Features
//!
//! - **Specificity Matching**: Match by body, headers, query, URL and per-test state
//! - **Scenarios**: Baseline mocks overridden by the test's active scenario
//! - **Sequences**: Ordered responses with `last`, `cycle` or `none` repeat
//! - **State Responses**: Responses chosen by per-test state
//! - **State Capture**: Copy request values into per-test state
//! - **Templates**: `{{state.x}}` and `{{params.y}}` placeholders
//!
//! # Example Configuration
//!
//! ```yaml
//! scenarios:
//!   - id: default
//!     mocks:
//!       - method: GET
//!         url: /api/products
//!         response:
//!           body: {tier: standard}
//!       - method: GET
//!         url: /api/products
//!         match:
//!           headers: {x-tier: premium}
//!         response:
//!           body: {tier: premium}
//! ```

pub mod condition;
pub mod config;
pub mod context;
pub mod engine;
pub mod matcher;
pub mod path;
pub mod registry;
pub mod selector;
pub mod sequence;
pub mod state;
pub mod template;

pub use config::{EngineConfig, MockDefinition, StaticResponse};
pub use context::RequestContext;
pub use engine::MockEngine;
pub use selector::{MockWithParams, ResolvedResponse, ResponseSelector, SelectionError};
