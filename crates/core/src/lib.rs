//! Domain logic for calculation jobs: identifiers, workspace isolation and
//! the session lifecycle. No HTTP and no engine access lives here.

pub mod error;
pub mod session;
pub mod types;
pub mod workspace;
