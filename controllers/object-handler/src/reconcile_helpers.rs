//! Helper functions for status persistence
//!
//! The reconciler computes the desired status on a copy of the snapshot read
//! at the start of a pass and writes it back with a single merge patch, only
//! when something changed.

use crds::ObjectHandlerStatus;

/// Check whether the computed status differs from the persisted one.
///
/// Skipping no-op patches keeps status writes from re-triggering the
/// controller.
pub fn status_needs_update(current: Option<&ObjectHandlerStatus>, desired: &ObjectHandlerStatus) -> bool {
    current != Some(desired)
}

/// Merge patch writing `conditions` and `handlerStatus`.
///
/// Both lists are always present so that an empty list clears the field:
/// merge patches replace lists wholesale.
pub fn create_status_patch(status: &ObjectHandlerStatus) -> Result<serde_json::Value, serde_json::Error> {
    Ok(serde_json::json!({
        "status": {
            "conditions": serde_json::to_value(&status.conditions)?,
            "handlerStatus": serde_json::to_value(&status.handler_status)?,
        }
    }))
}

/// Key used for per-instance bookkeeping (`namespace/name`)
pub fn resource_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
