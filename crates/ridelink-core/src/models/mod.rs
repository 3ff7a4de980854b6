//! RIDELINK 도메인 모델.
//!
//! 서버-클라이언트 간 공유하는 이벤트 카탈로그, 페이로드, 운행/세션 구조체를 정의한다.

pub mod event;
pub mod payload;
pub mod ride;
pub mod session;
