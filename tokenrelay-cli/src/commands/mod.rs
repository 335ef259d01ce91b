pub mod completion;
pub mod config;
pub mod control;
pub mod follow;
