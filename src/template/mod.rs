pub mod engine;

pub use engine::TemplateEngine;
