//! Rewoven Core - Shared domain types for the textile-waste marketplace.
//!
//! This crate provides the types shared by every Rewoven component:
//! - `web` - Backend-for-frontend serving the role-gated marketplace views
//! - `integration-tests` - Fakes and cross-module tests
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no HTTP clients,
//! no caching. Entities mirror the backend tables and carry their own create
//! (`Draft`) and partial update (`Patch`) payloads.
//!
//! # Modules
//!
//! - [`types`] - Typed ids, roles, statuses, and emails
//! - [`entity`] - Marketplace entities and the [`Entity`] trait

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod entity;
pub mod types;

pub use entity::*;
pub use types::*;
