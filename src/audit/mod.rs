//! Catalog audit lifecycle: apply identifiers, transitions and the
//! coordinator driving them against the workflow engine.

mod apply_id;
mod coordinator;
mod sn_generator;
mod transition;

pub use apply_id::{decode_apply_id, encode_apply_id};
pub use coordinator::{AuditCoordinator, PROC_DEF_DELETED_ADVICE};
pub use sn_generator::{sn_node_id, ApplySnGenerator, SnowflakeSnGenerator, MAX_NODE_ID, SN_EPOCH_MS};
pub use transition::{submit_states, AuditSubmission, AuditTransition};
