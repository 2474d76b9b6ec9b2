//! Operator-facing error reporting.

pub mod reporter;

pub use reporter::{ErrorReporter, ReportLevel};
