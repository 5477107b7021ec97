// src/core/model/mod.rs

//! The controller's data model: nodes, partitions, jobs, steps,
//! associations, QOS classes, reservations, and usage records.

pub mod assoc;
pub mod config;
pub mod job;
pub mod node;
pub mod partition;
pub mod qos;
pub mod resv;
pub mod step;
pub mod usage;

pub use assoc::{AssocLimits, Association};
pub use config::ConfigRecord;
pub use job::{JobDetails, JobRecord, JobState, JobSubmit, JobUpdate, TaskDist};
pub use node::{NodeRecord, NodeState};
pub use partition::{PartRecord, PartitionUpdate, SharedPolicy};
pub use qos::Qos;
pub use resv::Reservation;
pub use step::{STEP_BATCH, STEP_INTERACTIVE, StepRecord, StepRequest};
pub use usage::{AssocUsage, ClusterUsage, RollupPeriod, WckeyUsage};
