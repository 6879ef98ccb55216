//! Domain model module declarations.

pub mod event;
pub mod project;
pub mod run;
