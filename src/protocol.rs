//! Wire protocol: one JSON object per line, tagged by `type`.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::engine::{EngineError, ErrorKind};

fn default_timezone() -> String {
    // Equivalent to UTC.
    "Africa/Accra".to_string()
}

fn default_buffer() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        token: String,
    },
    Register {
        email: String,
        first_name: String,
        last_name: String,
    },
    Sub {
        court_id: Uuid,
    },
    Unsub {
        court_id: Uuid,
    },
    Book {
        court_id: Uuid,
        start_time: DateTime<Utc>,
        duration: i64,
    },
    Reschedule {
        booking_id: Uuid,
        start_time: DateTime<Utc>,
        duration: i64,
    },
    Cancel {
        booking_id: Uuid,
    },
    Courts,
    Bookings,
    Availability {
        court_id: Uuid,
        date: NaiveDate,
        #[serde(default = "default_timezone")]
        timezone: String,
        #[serde(default = "default_buffer")]
        buffer_minutes: i64,
    },
    CreateCourt {
        name: String,
        location: String,
        open: NaiveTime,
        close: NaiveTime,
    },
    DeleteCourt {
        court_id: Uuid,
    },
    AddWorker {
        court_id: Uuid,
        name: String,
        email: String,
    },
    AddSlot {
        court_id: Uuid,
        #[serde(default)]
        weekday: Option<String>,
        #[serde(default)]
        date: Option<NaiveDate>,
        opening: NaiveTime,
        closing: NaiveTime,
    },
    RemoveSlot {
        slot_id: Uuid,
    },
    CreateEquipment {
        name: String,
    },
    AssignEquipment {
        equipment_id: Uuid,
        account_id: Uuid,
    },
    ReturnEquipment {
        equipment_id: Uuid,
        account_id: Uuid,
    },
    Equipment,
}

pub fn parse_client_message(line: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(line)
}

// ── Replies ──────────────────────────────────────────────

pub fn success() -> Value {
    json!({"status": "success"})
}

/// `{"status": "success"}` merged with extra fields.
pub fn success_with(extra: Value) -> Value {
    let mut out = success();
    if let (Some(out_map), Value::Object(extra_map)) = (out.as_object_mut(), extra) {
        for (k, v) in extra_map {
            out_map.insert(k, v);
        }
    }
    out
}

pub fn error(kind: &str, details: impl Into<String>) -> Value {
    json!({"status": "error", "kind": kind, "details": details.into()})
}

/// Map an engine failure onto the wire. Internal failures are logged in full
/// but answered with a generic message.
pub fn engine_error(e: &EngineError) -> Value {
    let kind = e.kind();
    match kind {
        ErrorKind::Internal => {
            tracing::error!(error = %e, "internal error");
            error(kind.as_str(), "internal error")
        }
        _ => error(kind.as_str(), e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sub() {
        let msg =
            parse_client_message(r#"{"type":"sub","court_id":"5e24ee8d-3efc-44a5-9d4d-9e2351423d4e"}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::Sub { .. }));
    }

    #[test]
    fn parses_book_with_iso8601_start() {
        let msg = parse_client_message(
            r#"{"type":"book","court_id":"5e24ee8d-3efc-44a5-9d4d-9e2351423d4e","start_time":"2026-09-02T12:00:00Z","duration":1}"#,
        )
        .unwrap();
        let ClientMessage::Book { start_time, duration, .. } = msg else {
            panic!("expected book");
        };
        assert_eq!(duration, 1);
        assert_eq!(start_time.to_rfc3339(), "2026-09-02T12:00:00+00:00");
    }

    #[test]
    fn availability_defaults_apply() {
        let msg = parse_client_message(
            r#"{"type":"availability","court_id":"5e24ee8d-3efc-44a5-9d4d-9e2351423d4e","date":"2026-09-02"}"#,
        )
        .unwrap();
        let ClientMessage::Availability { timezone, buffer_minutes, .. } = msg else {
            panic!("expected availability");
        };
        assert_eq!(timezone, "Africa/Accra");
        assert_eq!(buffer_minutes, 1);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(parse_client_message(r#"{"type":"frobnicate"}"#).is_err());
        assert!(parse_client_message("not json at all").is_err());
    }

    #[test]
    fn reply_shapes() {
        assert_eq!(success().to_string(), r#"{"status":"success"}"#);

        let ok = success_with(json!({"booking_id": "x"}));
        assert_eq!(ok["status"], "success");
        assert_eq!(ok["booking_id"], "x");

        let err = error("invalid", "bad payload");
        assert_eq!(err["status"], "error");
        assert_eq!(err["kind"], "invalid");
        assert_eq!(err["details"], "bad payload");
    }

    #[test]
    fn engine_errors_map_to_kinds() {
        let e = EngineError::CourtNotFound(Uuid::new_v4());
        assert_eq!(engine_error(&e)["kind"], "not_found");

        let e = EngineError::StartInPast;
        assert_eq!(engine_error(&e)["kind"], "conflict");

        let e = EngineError::InvalidInput("nope".into());
        assert_eq!(engine_error(&e)["kind"], "invalid");

        // Internal detail does not leak.
        let e = EngineError::Wal("disk on fire at /var/lib".into());
        let v = engine_error(&e);
        assert_eq!(v["kind"], "internal");
        assert_eq!(v["details"], "internal error");
    }
}
