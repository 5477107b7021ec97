// src/core/tasks/mod.rs

//! Long-running background agents: the scheduler tick, node health
//! probe, usage-rollup driver, job purge, credential-expiry sweeper, and
//! periodic state save.

pub mod cred_sweeper;
pub mod health;
pub mod purge;
pub mod rollup_driver;
pub mod scheduler;
pub mod state_save;
