//! Raw graph definitions: parsing, adaptation into a schema, and validation.

pub mod adapter;
pub mod canvas;
pub mod parser;
pub mod validation;

pub use adapter::adapt_canvas;
pub use canvas::{Canvas, CanvasEdge, CanvasInput, CanvasNode, CanvasOutput, CanvasSubWorkflow, CanvasValue};
pub use parser::{load_workflow, parse_canvas, DslFormat};
pub use validation::{validate_schema, Diagnostic, DiagnosticLevel, ValidationReport};
