//! Crucible - an adversarial content refinement core
//!
//! Crucible coordinates two opposing collaborators - a content generator and a
//! content validator - through an iterative improvement cycle until the content
//! meets a confidence threshold, diverges unsafely, or exhausts its budget.

pub mod config;
pub mod convergence;
pub mod disagreement;
pub mod domain;
pub mod error;
pub mod events;
pub mod id;
pub mod learning;
pub mod providers;
pub mod quality;
pub mod service;
pub mod store;

pub use error::{CrucibleError, Result};
