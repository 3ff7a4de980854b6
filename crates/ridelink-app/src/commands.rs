//! 대화형 명령 해석.
//!
//! 표준 입력 한 줄을 [`Command`]로 변환한다.

use ridelink_core::models::ride::{GeoPoint, RideState, Role};
use ridelink_core::models::session::{AppState, Reachability};

/// 사용자 명령
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect,
    Disconnect,
    Reconnect,
    /// 앱 포그라운드/백그라운드 전환 시뮬레이션
    App(AppState),
    /// 네트워크 온라인/오프라인 전환 시뮬레이션
    Network(Reachability),
    Search,
    Request,
    Cancel(Option<String>),
    /// 임의 운행 전이 (기사 명령 포함)
    Ride(RideState),
    Location(GeoPoint),
    Chat(String),
    Rate { stars: u8, comment: Option<String> },
    Sos(String),
    Status,
    ShowRide,
    Help,
    Quit,
}

pub const HELP: &str = "\
명령:
  connect | disconnect | reconnect
  fg | bg                      앱 포그라운드/백그라운드
  online | offline             네트워크 상태 전환
  search | request | cancel [사유]
  ride <state>                 운행 전이 (accepted, arriving, arrived, started, in_progress, completed, rejected ...)
  loc <위도> <경도>            위치 송신
  chat <메시지>
  rate <1-5> [코멘트]
  sos [유형]
  status | current | help | quit";

/// 한 줄 해석. 빈 줄은 `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let rest_opt = || (!rest.is_empty()).then(|| rest.to_string());

    let command = match head.to_ascii_lowercase().as_str() {
        "connect" => Command::Connect,
        "disconnect" => Command::Disconnect,
        "reconnect" => Command::Reconnect,
        "fg" | "foreground" => Command::App(AppState::Foreground),
        "bg" | "background" => Command::App(AppState::Background),
        "online" => Command::Network(Reachability::Online),
        "offline" => Command::Network(Reachability::Offline),
        "search" => Command::Search,
        "request" => Command::Request,
        "cancel" => Command::Cancel(rest_opt()),
        "ride" => Command::Ride(parse_ride_state(rest)?),
        "loc" | "location" => {
            let mut parts = rest.split_whitespace();
            let latitude = parse_coord(parts.next(), "위도")?;
            let longitude = parse_coord(parts.next(), "경도")?;
            Command::Location(GeoPoint {
                latitude,
                longitude,
            })
        }
        "chat" => {
            if rest.is_empty() {
                return Err("메시지가 비어 있음".to_string());
            }
            Command::Chat(rest.to_string())
        }
        "rate" => {
            let (stars, comment) = match rest.split_once(char::is_whitespace) {
                Some((stars, comment)) => (stars, Some(comment.trim().to_string())),
                None => (rest, None),
            };
            let stars = stars
                .parse::<u8>()
                .map_err(|_| format!("별점은 1~5 숫자: {stars:?}"))?;
            Command::Rate { stars, comment }
        }
        "sos" => Command::Sos(rest_opt().unwrap_or_else(|| "sos".to_string())),
        "status" => Command::Status,
        "current" => Command::ShowRide,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("알 수 없는 명령: {other} (help 참고)")),
    };
    Ok(Some(command))
}

/// 와이어 표기(`in_progress` 등)로 운행 상태 해석
pub fn parse_ride_state(text: &str) -> Result<RideState, String> {
    serde_json::from_value(serde_json::Value::String(text.trim().to_ascii_lowercase()))
        .map_err(|_| format!("알 수 없는 운행 상태: {text:?}"))
}

/// CLI `--role` 해석
pub fn parse_role(text: &str) -> Result<Role, String> {
    serde_json::from_value(serde_json::Value::String(text.trim().to_ascii_lowercase()))
        .map_err(|_| format!("역할은 rider 또는 driver: {text:?}"))
}

fn parse_coord(value: Option<&str>, name: &str) -> Result<f64, String> {
    let value = value.ok_or_else(|| format!("{name} 누락"))?;
    value
        .parse::<f64>()
        .map_err(|_| format!("{name} 형식 오류: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_commands() {
        assert_eq!(parse("connect").unwrap(), Some(Command::Connect));
        assert_eq!(parse("  BG ").unwrap(), Some(Command::App(AppState::Background)));
        assert_eq!(
            parse("offline").unwrap(),
            Some(Command::Network(Reachability::Offline))
        );
        assert_eq!(parse("").unwrap(), None);
    }

    #[test]
    fn parses_ride_commands() {
        assert_eq!(
            parse("ride in_progress").unwrap(),
            Some(Command::Ride(RideState::InProgress))
        );
        assert_eq!(
            parse("cancel 기사가 오지 않음").unwrap(),
            Some(Command::Cancel(Some("기사가 오지 않음".to_string())))
        );
        assert_eq!(parse("cancel").unwrap(), Some(Command::Cancel(None)));
        assert!(parse("ride flying").is_err());
    }

    #[test]
    fn parses_payload_commands() {
        assert_eq!(
            parse("loc 37.5665 126.978").unwrap(),
            Some(Command::Location(GeoPoint {
                latitude: 37.5665,
                longitude: 126.978
            }))
        );
        assert!(parse("loc 37.5").is_err());
        assert_eq!(
            parse("rate 5 친절해요").unwrap(),
            Some(Command::Rate {
                stars: 5,
                comment: Some("친절해요".to_string())
            })
        );
        assert!(parse("rate five").is_err());
        assert!(parse("chat").is_err());
        assert_eq!(parse("sos").unwrap(), Some(Command::Sos("sos".to_string())));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(parse("teleport").is_err());
    }

    #[test]
    fn parses_roles() {
        assert_eq!(parse_role("Driver").unwrap(), Role::Driver);
        assert!(parse_role("pilot").is_err());
    }
}
