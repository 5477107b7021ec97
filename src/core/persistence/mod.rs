// src/core/persistence/mod.rs

//! Controller state persistence: rolling state files under
//! `StateSaveLocation`.

pub mod state_save;

pub use state_save::{restore_controller_state, save_controller_state};
