//! WebSocket stream protocol
//!
//! The client opens with `start` (or `resume` after a disconnect) and may send
//! `ping` and `cancel` while the stream runs. The server answers with the
//! frames below; stream events themselves are sent as plain event JSON.

use agent_coordinator::RateLimited;
use conclave_core::coordination::CoordinationRequest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client -> server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Start { request: CoordinationRequest },
    Ping,
    Cancel,
    /// Reattach to a running stream after the previous socket dropped
    Resume { stream_id: Uuid },
}

/// Server -> client control frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The stream has started; keep the id to resume it
    Session { stream_id: Uuid },
    Resumed { stream_id: Uuid },
    Pong,
    Rejected {
        kind: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
}

impl ServerFrame {
    pub fn rejected(kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Rejected {
            kind: kind.into(),
            error: error.into(),
            retry_after_secs: None,
        }
    }
}

impl From<RateLimited> for ServerFrame {
    fn from(limited: RateLimited) -> Self {
        Self::Rejected {
            kind: "rate_limited".to_string(),
            error: limited.to_string(),
            retry_after_secs: Some(limited.retry_after_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use conclave_core::coordination::CoordinationMode;

    #[test]
    fn test_parse_start() {
        let json = r#"{"type":"start","request":{"query":"Plan a launch","primary_agent":"pm","supporting_agents":["ux"],"coordination_mode":"collaborative"}}"#;
        match serde_json::from_str::<ClientFrame>(json).unwrap() {
            ClientFrame::Start { request } => {
                assert_eq!(request.primary_agent, "pm");
                assert_eq!(request.coordination_mode, CoordinationMode::Collaborative);
            }
            other => panic!("Expected start frame, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"ping"}"#).unwrap(),
            ClientFrame::Ping
        );
        assert_eq!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"cancel"}"#).unwrap(),
            ClientFrame::Cancel
        );
        let stream_id = Uuid::new_v4();
        let json = format!(r#"{{"type":"resume","stream_id":"{}"}}"#, stream_id);
        assert_eq!(
            serde_json::from_str::<ClientFrame>(&json).unwrap(),
            ClientFrame::Resume { stream_id }
        );
    }

    #[test]
    fn test_rejected_frame_carries_retry_after() {
        let frame = ServerFrame::from(RateLimited {
            endpoint: "stream".to_string(),
            limit: 5,
            window_secs: 60,
            retry_after_secs: 7,
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "rejected");
        assert_eq!(json["kind"], "rate_limited");
        assert_eq!(json["retry_after_secs"], 7);

        let json = serde_json::to_value(ServerFrame::rejected("invalid_request", "bad")).unwrap();
        assert!(json.get("retry_after_secs").is_none());
    }
}
