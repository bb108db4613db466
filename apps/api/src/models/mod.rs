pub mod program;
pub mod project;
pub mod stages;
