pub mod command;
pub mod driver;
pub mod environment;
pub mod jobs;
pub mod nodes;
pub mod parser;
pub mod queue;
pub mod resource;
pub mod scheduler;
