//! Integration tests for ouctl
//!
//! These tests require a Kubernetes cluster (kind) and tell the story of how
//! ouctl uses the API server while deploying a portal.
//!
//! # Test Organization
//!
//! - `cluster_api`: Stories about namespaces, labels and the credential
//!   secret, exercised through `KubeCluster`
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod cluster_api;
mod helpers;
