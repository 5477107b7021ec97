// src/core/model/qos.rs

//! Quality-of-service classes.

use crate::core::Bitmap;
use crate::core::model::assoc::AssocLimits;

/// A QOS class: limits plus a preemption relation over other classes and a
/// usage cost multiplier. The preemption relation must stay acyclic; the
/// transitive-closure check runs on every modification.
#[derive(Debug, Clone)]
pub struct Qos {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub limits: AssocLimits,
    /// QOS ids this class may preempt.
    pub preempt: Bitmap,
    /// Cost multiplier applied to usage charged under this class.
    pub usage_factor: f64,
    pub priority: u32,
    pub deleted: bool,
    pub mod_time: i64,
}

impl Qos {
    pub fn new(id: u32, name: String, qos_width: usize) -> Self {
        Self {
            id,
            name,
            description: String::new(),
            limits: AssocLimits::default(),
            preempt: Bitmap::new(qos_width),
            usage_factor: 1.0,
            priority: 0,
            deleted: false,
            mod_time: 0,
        }
    }
}
