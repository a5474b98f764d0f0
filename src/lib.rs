pub mod descriptor;
pub mod error;
pub mod grid;
pub mod model;
pub mod normalization;
pub mod parser;
pub mod term;

pub use descriptor::{CoverageDescriptor, Descriptor};
pub use error::{ModelError, Result};
pub use grid::{evaluate_grid, Grid, GridConfig};
pub use model::{CoverageModel, Model};
pub use normalization::{Distribution, Normalization};
pub use term::Term;
