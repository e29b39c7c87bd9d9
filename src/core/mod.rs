//! Core types shared by every servicekit module.
//!
//! Currently this is the error taxonomy ([`ServiceError`]) and its CLI
//! rendering ([`ErrorContext`], [`user_friendly_error`]).

pub mod error;

pub use error::{ErrorContext, ServiceError, user_friendly_error};
