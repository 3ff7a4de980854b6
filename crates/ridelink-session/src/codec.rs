//! 이벤트 프레임 코덱.
//!
//! 와이어 형식: `{"type": "ride:accepted", "payload": {...}, "timestamp": 1738000000000}`

use chrono::{DateTime, Utc};
use ridelink_core::models::event::{Event, EventType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 디코딩 실패 — 프레임은 버려지고 연결은 유지된다
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// JSON 구조 오류
    #[error("잘못된 프레임: {0}")]
    Malformed(String),
    /// 카탈로그에 없는 이벤트 타입
    #[error("알 수 없는 이벤트 타입: {0}")]
    UnknownType(String),
}

#[derive(Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// 이벤트를 와이어 프레임으로 직렬화
pub fn encode(event: &Event) -> Result<String, serde_json::Error> {
    let frame = WireFrame {
        event_type: event.event_type.as_str().to_string(),
        payload: event.payload.clone(),
        timestamp: Some(event.sent_at.timestamp_millis()),
    };
    serde_json::to_string(&frame)
}

/// 와이어 프레임을 이벤트로 역직렬화
pub fn decode(text: &str) -> Result<Event, CodecError> {
    let frame: WireFrame =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let event_type = EventType::from_wire(&frame.event_type)
        .ok_or_else(|| CodecError::UnknownType(frame.event_type.clone()))?;

    let payload = match frame.payload {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        value @ serde_json::Value::Object(_) => value,
        other => {
            return Err(CodecError::Malformed(format!(
                "payload는 객체여야 함: {other}"
            )))
        }
    };

    let sent_at = frame
        .timestamp
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    Ok(Event {
        event_type,
        payload,
        sent_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridelink_core::models::payload::RidePayload;

    #[test]
    fn encode_uses_wire_names() {
        let event = Event::new(EventType::RideInProgress, &RidePayload::new("ride_1")).unwrap();
        let text = encode(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "ride:in_progress");
        assert_eq!(value["payload"]["rideId"], "ride_1");
        assert_eq!(value["timestamp"], event.sent_at.timestamp_millis());
    }

    #[test]
    fn decode_known_frame() {
        let text = r#"{"type":"ride:accepted","payload":{"rideId":"r1","counterpartyId":"d7"},"timestamp":1738000000000}"#;
        let event = decode(text).unwrap();
        assert_eq!(event.event_type, EventType::RideAccepted);
        assert_eq!(event.sent_at.timestamp_millis(), 1_738_000_000_000);
        let payload: RidePayload = event.payload_as().unwrap();
        assert_eq!(payload.counterparty_id.as_deref(), Some("d7"));
    }

    #[test]
    fn unknown_type_is_reported() {
        let text = r#"{"type":"ride:teleported","payload":{}}"#;
        assert_eq!(
            decode(text),
            Err(CodecError::UnknownType("ride:teleported".to_string()))
        );
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(decode("{oops"), Err(CodecError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"payload":{}}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn missing_payload_and_timestamp_are_tolerated() {
        let event = decode(r#"{"type":"system:pong"}"#).unwrap();
        assert_eq!(event.event_type, EventType::SystemPong);
        assert!(event.payload.is_object());
    }

    #[test]
    fn non_object_payload_is_malformed() {
        assert!(matches!(
            decode(r#"{"type":"chat:message","payload":[1,2]}"#),
            Err(CodecError::Malformed(_))
        ));
    }
}
