//! CredChain - freelancer credentials anchored on an EVM smart contract
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Pipeline
//! - [`verification`] - Project submission and pending verification
//! - [`content`] - Link normalization, remote fetching, content hashing
//! - [`profiles`] - Freelancer and client profiles, badges
//!
//! ## Chain Access
//! - [`contract`] - Contract binding and the serialized write path over `ethers`
//! - [`crypto`] - SHA-256, addresses, signer keys
//!
//! ## State Management
//! - [`persistence`] - JSON file, SQLite, and in-memory stores
//!
//! ## Serving
//! - [`api`] - HTTP endpoints
//! - [`server`] - Process bootstrap
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Pipeline
// ============================================================================
pub mod content;
pub mod profiles;
pub mod verification;

// ============================================================================
// Chain Access
// ============================================================================
pub mod contract;
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Serving
// ============================================================================
pub mod api;
pub mod server;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
