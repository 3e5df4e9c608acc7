//! Homestead - self-hosted infrastructure provisioning for Kubernetes
//!
//! Homestead renders, applies, and operates the resources backing
//! self-hosted infrastructure components (databases, caches, admin tools)
//! on a Kubernetes cluster:
//! - Declarative manifest generation and idempotency-checked apply
//! - Best-effort clean and read-only status reporting
//! - Streaming backup/restore for stateful services via pod exec
//! - Administrative database operations (role/database management)
//! - Deployment rollout control (restart, status, history, undo)
//!
//! # Modules
//!
//! - [`modules`] - Module lifecycle contract and the per-component modules
//! - [`kubernetes`] - Cluster client, typed resource gateway, pod exec
//! - [`backup`] - Backup and restore engines
//! - [`admin`] - Administrative database operations over remote psql
//! - [`rollout`] - Deployment rollout operations
//! - [`sql`] - Centralized identifier validation and quoting
//! - [`config`] - Application configuration
//! - [`logging`] - Structured logging setup

pub mod admin;
pub mod backup;
pub mod config;
pub mod kubernetes;
pub mod logging;
pub mod modules;
pub mod rollout;
pub mod sql;

pub use homestead_common::{BackupManifest, Error, Result};
