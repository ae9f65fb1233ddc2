//! Parameter grids and command materialization for parametric studies.

pub mod command;
pub mod error;
pub mod fs;
pub mod grammar;
pub mod grid;
pub mod report;
pub mod value;

pub use command::{CommandTemplate, MaterializedRun, Materializer, OptionalFragment, RunInfo};
pub use error::{Result, SweepError};
pub use grammar::{
    apply_combine, parse_combination, parse_combine, parse_study_axes, parse_token, AxisKind,
    ParameterAxis, Token,
};
pub use grid::{generate_grid, summarize_grid, Assignment, GridSummary, RunConfiguration};
pub use report::Reporter;
pub use value::{AxisValue, Scalar};
