//! Integration tests for kindle
//!
//! # Test Organization
//!
//! - `crd_schema`: Stories about the generated CustomResourceDefinition that
//!   `kindle --crd` prints and the controller installs on startup
//!
//! - `provider_lifecycle`: Stories about creating, observing, scaling and
//!   deleting clusters against a real Docker daemon
//!
//! # Running These Tests
//!
//! ```bash
//! # Schema tests run with the normal suite
//! cargo test --test docker
//!
//! # Provider tests need Docker and are slow (image pulls)
//! cargo test --test docker provider_lifecycle -- --ignored --nocapture --test-threads=1
//! ```

mod crd_schema;
mod helpers;
mod provider_lifecycle;
