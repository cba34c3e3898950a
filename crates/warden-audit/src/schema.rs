//! What a well-formed event looks like.
//!
//! Two layers, both run before anything touches the chain:
//!
//! - `validate_payload` enforces required fields on typed payloads.
//! - `validate_ingest` checks a raw producer JSON body against the per-kind
//!   JSON Schema before it is deserialized.

use serde_json::{json, Value};
use tracing::warn;

use warden_contracts::{
    error::LedgerError,
    event::{EventKind, EventPayload},
};

fn invalid(kind: EventKind, reason: impl Into<String>) -> LedgerError {
    LedgerError::InvalidEvent {
        kind: kind.to_string(),
        reason: reason.into(),
    }
}

fn require(kind: EventKind, field: &str, value: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() {
        return Err(invalid(kind, format!("required field '{field}' is missing or empty")));
    }
    Ok(())
}

/// Reject payloads missing a field their kind requires.
pub fn validate_payload(payload: &EventPayload) -> Result<(), LedgerError> {
    let kind = payload.kind();
    require(kind, "trace_id", payload.trace_id())?;

    match payload {
        EventPayload::AgentReasoning(r) => require(kind, "agent", &r.agent),
        EventPayload::DelegationDecision(d) => {
            require(kind, "from_agent", &d.from_agent)?;
            require(kind, "to_agent", &d.to_agent)
        }
        EventPayload::PolicyDecision(d) => {
            require(kind, "actor", &d.actor)?;
            require(kind, "resource_type", &d.resource_type)?;
            require(kind, "resource_id", &d.resource_id)
        }
        EventPayload::ToolExecution(e) => {
            require(kind, "actor", &e.actor)?;
            require(kind, "resource_type", &e.resource_type)?;
            require(kind, "resource_id", &e.resource_id)?;
            require(kind, "tool", &e.tool)
        }
    }
}

fn non_empty() -> Value {
    json!({ "type": "string", "minLength": 1 })
}

/// The JSON Schema a raw producer body of `kind` must satisfy.
pub fn schema_for(kind: EventKind) -> Value {
    let action_class = json!({ "enum": ["read", "write", "destructive"] });
    let origin = json!({ "enum": ["agent_mediated", "direct"] });

    match kind {
        EventKind::AgentReasoning => json!({
            "type": "object",
            "required": ["trace_id", "agent", "summary"],
            "properties": {
                "trace_id": non_empty(),
                "agent": non_empty(),
                "summary": { "type": "string" }
            }
        }),
        EventKind::DelegationDecision => json!({
            "type": "object",
            "required": ["trace_id", "from_agent", "to_agent", "task"],
            "properties": {
                "trace_id": non_empty(),
                "from_agent": non_empty(),
                "to_agent": non_empty(),
                "task": { "type": "string" },
                "rationale": { "type": "string" }
            }
        }),
        EventKind::PolicyDecision => json!({
            "type": "object",
            "required": [
                "trace_id", "actor", "role", "resource_type", "resource_id",
                "environment", "action_class", "origin", "effect", "source"
            ],
            "properties": {
                "trace_id": non_empty(),
                "actor": non_empty(),
                "resource_type": non_empty(),
                "resource_id": non_empty(),
                "action_class": action_class,
                "origin": origin,
                "effect": { "enum": ["allow", "deny", "no_match"] },
                "row_limit": { "type": ["integer", "null"], "minimum": 1 },
                "source": { "type": "object", "required": ["kind"] }
            }
        }),
        EventKind::ToolExecution => json!({
            "type": "object",
            "required": [
                "trace_id", "actor", "resource_type", "resource_id", "environment",
                "action_class", "origin", "tool", "outcome"
            ],
            "properties": {
                "trace_id": non_empty(),
                "actor": non_empty(),
                "resource_type": non_empty(),
                "resource_id": non_empty(),
                "action_class": action_class,
                "origin": origin,
                "tool": non_empty(),
                "outcome": { "enum": ["success", "failure"] },
                "rows_affected": { "type": ["integer", "null"], "minimum": 0 },
                "duration_ms": { "type": "integer", "minimum": 0 }
            }
        }),
    }
}

/// Validate a raw body against its kind's schema and decode it.
///
/// All schema violations are collected into one `InvalidEvent` so producers
/// see every problem at once.
pub fn validate_ingest(kind: EventKind, body: &Value) -> Result<EventPayload, LedgerError> {
    let schema = schema_for(kind);
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| invalid(kind, format!("ingest schema failed to compile: {e}")))?;

    let violations: Vec<String> = validator
        .iter_errors(body)
        .map(|error| format!("{}: {}", error.instance_path, error))
        .collect();
    if !violations.is_empty() {
        warn!(kind = %kind, violations = violations.len(), "ingest body rejected by schema");
        return Err(invalid(kind, violations.join("; ")));
    }

    let mut tagged = body.clone();
    if let Value::Object(map) = &mut tagged {
        map.insert("type".to_string(), Value::String(kind.as_str().to_string()));
    }
    let payload: EventPayload =
        serde_json::from_value(tagged).map_err(|e| invalid(kind, e.to_string()))?;
    validate_payload(&payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use warden_contracts::{error::LedgerError, event::EventKind};

    use super::validate_ingest;

    fn execution_body() -> serde_json::Value {
        json!({
            "trace_id": "t-9",
            "actor": "sre-agent",
            "resource_type": "database",
            "resource_id": "prod-db",
            "environment": "prod",
            "action_class": "write",
            "origin": "agent_mediated",
            "tool": "psql",
            "command": "UPDATE accounts SET flag = true",
            "outcome": "success",
            "rows_affected": 12,
            "duration_ms": 40
        })
    }

    #[test]
    fn test_well_formed_execution_is_accepted() {
        let payload = validate_ingest(EventKind::ToolExecution, &execution_body()).unwrap();
        assert_eq!(payload.kind(), EventKind::ToolExecution);
        assert_eq!(payload.trace_id(), "t-9");
    }

    #[test]
    fn test_missing_tool_is_rejected() {
        let mut body = execution_body();
        body.as_object_mut().unwrap().remove("tool");
        match validate_ingest(EventKind::ToolExecution, &body) {
            Err(LedgerError::InvalidEvent { kind, reason }) => {
                assert_eq!(kind, "tool_execution");
                assert!(reason.contains("tool"), "reason was: {reason}");
            }
            other => panic!("expected InvalidEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_action_class_is_rejected() {
        let mut body = execution_body();
        body["action_class"] = json!("drop_everything");
        assert!(matches!(
            validate_ingest(EventKind::ToolExecution, &body),
            Err(LedgerError::InvalidEvent { .. })
        ));
    }

    #[test]
    fn test_empty_trace_id_is_rejected() {
        let body = json!({ "trace_id": "", "agent": "planner", "summary": "s" });
        assert!(matches!(
            validate_ingest(EventKind::AgentReasoning, &body),
            Err(LedgerError::InvalidEvent { .. })
        ));
    }
}
