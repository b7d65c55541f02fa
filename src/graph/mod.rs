pub mod topology;

pub use topology::{scope_order, CycleError};
