//! Side-effecting collaborators: filesystem, child processes, reviewers.

pub mod config;
pub mod definition;
pub mod executor;
pub mod params;
pub mod process;
pub mod review;
pub mod run_store;
pub mod template;
