//! Everything that talks to the structural calculation engine: running
//! its batch executable ([`invoker`]) and reading its binary result
//! database through the vendor's native library ([`cdb`], [`extractor`]).

pub mod cdb;
pub mod extractor;
pub mod invoker;

pub use extractor::{DocumentKind, ResultDocument, ResultExtractor};
pub use invoker::{CalculationInvoker, CalculationOutcome, EngineError, InvokerConfig};
