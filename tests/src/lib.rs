//! # hmi-sync Test Suite
//!
//! Unified test crate exercising the public API end to end: a source and
//! one or more sinks over an in-memory transport, including loss and
//! disconnect recovery.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs        # Polling helpers, tracing init
//! └── integration/      # Cross-crate flows
//!     ├── blob_replication.rs
//!     ├── map_replication.rs
//!     ├── lifecycle.rs
//!     └── recovery.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p sync-tests
//!
//! # By category
//! cargo test -p sync-tests integration::recovery::
//! ```

pub mod integration;
pub mod support;
