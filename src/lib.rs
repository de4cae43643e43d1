pub mod analysis;
pub mod cli;
pub mod core;
pub mod decompose;
pub mod providers;
pub mod relay;
