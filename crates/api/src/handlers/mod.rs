//! Request handlers.
//!
//! Handlers delegate to [`crate::pipeline`] and map errors via
//! [`crate::error::AppError`].

pub mod calculation;
