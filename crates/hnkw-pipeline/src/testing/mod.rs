//! Testing utilities for hnkw-pipeline.
//!
//! Enabled with the `testing` feature for use from other crates' tests.
//!
//! # Components
//!
//! - [`fixtures`]: sample stories and model replies
//! - [`mock_server`]: HTTP mock of the OpenAI-compatible API

pub mod fixtures;
pub mod mock_server;

pub use fixtures::*;
pub use mock_server::MockApiServer;
