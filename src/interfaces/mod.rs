//! Outer surfaces: request shapes, CSV scripts and reports.

pub mod api;
pub mod csv;
pub mod script;
