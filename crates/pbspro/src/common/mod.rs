pub mod cli;
pub mod error;
pub mod parser2;
pub mod rangeparser;
pub mod selectparser;
pub mod setup;
pub mod timeutils;
