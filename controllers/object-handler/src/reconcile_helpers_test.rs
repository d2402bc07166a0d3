//! Unit tests for reconcile_helpers module

#[cfg(test)]
mod tests {
    use crate::reconcile_helpers::*;
    use chrono::Utc;
    use crds::*;

    fn ready_status() -> ObjectHandlerStatus {
        let mut status = ObjectHandlerStatus::default();
        set_condition(&mut status.conditions, Condition::ready(Some(1)), Utc::now());
        status.handler_status.push(HandlerStatus::new("pullRequestComment-0123456789abcdef"));
        status
    }

    #[test]
    fn test_status_needs_update_no_status() {
        assert!(
            status_needs_update(None, &ready_status()),
            "Should need update when status is None"
        );
    }

    #[test]
    fn test_status_needs_update_all_match() {
        let status = ready_status();
        assert!(
            !status_needs_update(Some(&status), &status.clone()),
            "Should not need update when all fields match"
        );
    }

    #[test]
    fn test_status_needs_update_handler_error_changed() {
        let current = ready_status();
        let mut desired = current.clone();
        desired.handler_status[0].error = "boom".to_string();
        assert!(status_needs_update(Some(&current), &desired));
    }

    #[test]
    fn test_status_needs_update_condition_changed() {
        let current = ready_status();
        let mut desired = current.clone();
        set_condition(
            &mut desired.conditions,
            Condition::not_ready(Some(1), REASON_ERROR, "failed"),
            Utc::now(),
        );
        assert!(status_needs_update(Some(&current), &desired));
    }

    #[test]
    fn test_create_status_patch_shape() {
        let patch = create_status_patch(&ready_status()).unwrap();
        let status = &patch["status"];
        assert_eq!(status["conditions"][0]["type"], "Ready");
        assert_eq!(status["conditions"][0]["status"], "True");
        assert_eq!(status["handlerStatus"][0]["key"], "pullRequestComment-0123456789abcdef");
        assert_eq!(status["handlerStatus"][0]["error"], "");
    }

    #[test]
    fn test_create_status_patch_clears_pruned_records() {
        let patch = create_status_patch(&ObjectHandlerStatus::default()).unwrap();
        assert_eq!(patch["status"]["handlerStatus"], serde_json::json!([]));
    }

    #[test]
    fn test_resource_key() {
        assert_eq!(resource_key("team-a", "oh"), "team-a/oh");
    }
}
