//! Execution events: what a tenant's handler receives when one of its tasks fires.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::EventId;

/// Error attached to an event (e.g. the consumer could not obtain data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    pub event_id: EventId,
    pub task_name: String,
}

/// One delivery of a fired task. Immutable once created.
///
/// Serialized shape (the "body" handed to the handler):
/// `{"executionInfo":{"eventId":"event-…","taskName":"…"},"data":{…},"error":null}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    execution_info: ExecutionInfo,
    data: Value,
    error: Option<ExecutionError>,
}

impl ExecutionEvent {
    /// `data: None` is normalized to an empty object.
    pub fn new(
        event_id: EventId,
        task_name: impl Into<String>,
        data: Option<Value>,
        error: Option<ExecutionError>,
    ) -> Self {
        Self {
            execution_info: ExecutionInfo {
                event_id,
                task_name: task_name.into(),
            },
            data: data.unwrap_or_else(|| json!({})),
            error,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.execution_info.event_id
    }

    pub fn task_name(&self) -> &str {
        &self.execution_info.task_name
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    pub fn body(&self) -> Value {
        json!({
            "executionInfo": {
                "eventId": self.execution_info.event_id.to_string(),
                "taskName": self.execution_info.task_name,
            },
            "data": self.data,
            "error": self.error.as_ref().map(|e| json!({ "message": e.message })),
        })
    }
}

/// Reads the correlating `eventId` out of a completion response.
pub fn event_id_from_response(response: &Value) -> Option<EventId> {
    response.get("eventId")?.as_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn body_has_expected_shape() {
        let id = EventId::from_ulid(Ulid::new());
        let ev = ExecutionEvent::new(id, "sync", None, Some(ExecutionError::new("no fix")));
        let body = ev.body();

        assert_eq!(body["executionInfo"]["eventId"], id.to_string());
        assert_eq!(body["executionInfo"]["taskName"], "sync");
        assert_eq!(body["data"], json!({}));
        assert_eq!(body["error"]["message"], "no fix");
    }

    #[test]
    fn serde_shape_matches_body() {
        let ev = ExecutionEvent::new(
            EventId::from_ulid(Ulid::new()),
            "sync",
            Some(json!({"locations": [1, 2]})),
            None,
        );
        assert_eq!(serde_json::to_value(&ev).unwrap(), ev.body());
    }

    #[test]
    fn event_id_is_read_from_response() {
        let id = EventId::from_ulid(Ulid::new());
        assert_eq!(
            event_id_from_response(&json!({"eventId": id.to_string(), "result": 1})),
            Some(id)
        );
        assert_eq!(event_id_from_response(&json!({"result": 1})), None);
        assert_eq!(event_id_from_response(&json!({"eventId": 42})), None);
    }
}
