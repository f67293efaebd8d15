//! Shared utilities and common types for the SkiMonitor backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Signature helpers for payment provider notifications
//! - Bearer token verification for identity provider tokens
//! - Common validation logic

pub mod crypto;
pub mod jwt;
pub mod validation;
