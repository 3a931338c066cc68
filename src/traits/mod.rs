mod diagnostics;
mod driver;

pub use diagnostics::{Diagnostic, DiagnosticSink, RecordingSink, TracingSink};
pub use driver::DatabaseDriver;
