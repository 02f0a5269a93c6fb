//! Use-case services.
//!
//! # Responsibility
//! - Sequence codec steps and repository calls into session-level APIs.
//! - Keep callers decoupled from storage details.

pub mod concept_service;
