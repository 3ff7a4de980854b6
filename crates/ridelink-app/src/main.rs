//! # ridelink-app
//!
//! RIDELINK 실시간 세션 클라이언트 바이너리 진입점.
//! 설정 로드, 로깅 초기화, 어댑터 와이어링, 대화형 명령 루프.

mod commands;
mod lifecycle;

use anyhow::{Context, Result};
use clap::Parser;
use ridelink_core::config::AppConfig;
use ridelink_core::config_manager::ConfigManager;
use ridelink_core::error::CoreError;
use ridelink_core::models::event::EventCategory;
use ridelink_core::models::ride::{RideState, Role};
use ridelink_core::models::session::Reachability;
use ridelink_network::connectivity::{probe_target, ConnectivityMonitor};
use ridelink_network::ws_transport::WsTransport;
use ridelink_session::{ConnectionManager, SessionOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::Command;
use crate::lifecycle::LifecycleManager;

/// RIDELINK 실시간 세션 클라이언트
///
/// 승객/기사 앱의 디스패치 서버 세션을 유지하고 운행 이벤트를 주고받는다.
#[derive(Parser, Debug)]
#[command(name = "ridelink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 서버 URL (설정 파일 값 대신 사용)
    #[arg(long, short = 's')]
    server: Option<String>,

    /// 인증 토큰
    #[arg(long, short = 't', env = "RIDELINK_TOKEN")]
    token: Option<String>,

    /// 클라이언트 역할 (rider, driver)
    #[arg(long, short = 'r', value_parser = commands::parse_role)]
    role: Option<Role>,

    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉토리)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// 네트워크 프로브 간격 (초, 0이면 비활성화)
    #[arg(long, default_value = "15")]
    probe_interval: u64,
}

/// 설정 로드 후 CLI 인자 적용 (파일에는 저장하지 않음)
fn load_config(args: &Args) -> Result<AppConfig> {
    let manager = match &args.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    }
    .context("설정 관리자 초기화 실패")?;
    info!("설정 파일: {:?}", manager.config_path());

    let mut config = manager.get();
    if let Some(url) = &args.server {
        config.server.url = url.clone();
    }
    if let Some(token) = &args.token {
        config.server.token = Some(token.clone());
    }
    if let Some(role) = args.role {
        config.server.role = role;
    }
    config.validate().context("설정 검증 실패")?;
    Ok(config)
}

/// 세션 알림을 터미널로 출력
fn register_listeners(session: &ConnectionManager) {
    session.on_connection_change(|state| info!("세션 상태: {state}"));
    session.on_error(|err| {
        if err.is_fatal() {
            error!("세션 에러: {err}");
            println!("⚠️  오프라인 — {err} (reconnect 명령으로 재시도)");
        } else {
            warn!("세션 에러: {err}");
        }
    });
    session.on_ride_update(|update| {
        println!(
            "🚕 운행 {}: {} → {}",
            update.ride.ride_id, update.from, update.to
        );
    });
    session.subscribe(EventCategory::Chat, |event| {
        println!("💬 {}: {}", event.event_type, event.payload);
    });
    session.subscribe(EventCategory::Emergency, |event| {
        println!("🚨 {}: {}", event.event_type, event.payload);
    });
    session.subscribe(EventCategory::System, |event| {
        println!("📢 {}", event.payload);
    });
}

/// 명령 실행. `false`면 종료.
async fn execute(
    command: Command,
    session: &ConnectionManager,
    lifecycle: &LifecycleManager,
    connectivity: &ConnectivityMonitor,
) -> bool {
    let result: Result<(), CoreError> = match command {
        Command::Connect => session.connect(),
        Command::Disconnect => session.disconnect(),
        Command::Reconnect => session.reconnect(),
        Command::App(app_state) => {
            lifecycle.set_app_state(app_state);
            Ok(())
        }
        Command::Network(reachability) => {
            connectivity.set_force_offline(reachability == Reachability::Offline);
            connectivity.set_reachability(reachability);
            Ok(())
        }
        Command::Search => session.start_search().await,
        Command::Request => session.request_ride().await,
        Command::Cancel(reason) => session.cancel_ride(reason).await,
        Command::Ride(RideState::Cancelled) => session.cancel_ride(None).await,
        Command::Ride(target) => session.transition_ride(target).await,
        Command::Location(point) => session.send_location(point, None).await,
        Command::Chat(text) => session.send_chat(text).await,
        Command::Rate { stars, comment } => session.rate_ride(stars, comment).await,
        Command::Sos(kind) => session.send_emergency(kind, None).await,
        Command::Status => {
            let status = session.status();
            println!(
                "상태: {} | 건강: {} | 온라인: {} | 앱: {:?} | 시도: {} | 자동 재연결: {}",
                status.state,
                session.is_healthy(),
                status.online,
                status.app_state,
                status.reconnect_attempts,
                status.auto_reconnect
            );
            Ok(())
        }
        Command::ShowRide => {
            match session.current_ride() {
                Some(ride) => println!(
                    "운행 {} — {} (상대방: {})",
                    ride.ride_id,
                    ride.state,
                    ride.counterparty_id.as_deref().unwrap_or("-")
                ),
                None => println!("진행 중인 운행 없음"),
            }
            Ok(())
        }
        Command::Help => {
            println!("{}", commands::HELP);
            Ok(())
        }
        Command::Quit => return false,
    };
    if let Err(e) = result {
        println!("❌ {e}");
    }
    true
}

/// 표준 입력 명령 루프 (quit 또는 EOF까지)
async fn command_loop(
    session: ConnectionManager,
    lifecycle: Arc<LifecycleManager>,
    connectivity: Arc<ConnectivityMonitor>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match commands::parse(&line) {
            Ok(Some(command)) => {
                if !execute(command, &session, &lifecycle, &connectivity).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => println!("❌ {e}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_filter = format!(
        "ridelink={lvl},ridelink_app={lvl},ridelink_core={lvl},ridelink_session={lvl},ridelink_network={lvl}",
        lvl = args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();

    let config = load_config(&args)?;
    info!(
        "RIDELINK 클라이언트 시작 (역할: {:?}, 서버: {})",
        config.server.role, config.server.url
    );

    let lifecycle = Arc::new(LifecycleManager::new());
    let connectivity = Arc::new(ConnectivityMonitor::default());
    if args.probe_interval > 0 {
        match probe_target(&config.server.url) {
            Ok(target) => {
                tokio::spawn(connectivity.clone().run_probe(
                    target,
                    Duration::from_secs(args.probe_interval),
                    lifecycle.subscribe_shutdown(),
                ));
            }
            Err(e) => warn!("네트워크 프로브 비활성화: {e}"),
        }
    }

    let transport = Arc::new(WsTransport::new(&config.server)?);
    let session = ConnectionManager::spawn(
        SessionOptions::from_config(&config),
        transport,
        lifecycle.as_ref(),
        connectivity.as_ref(),
    );
    register_listeners(&session);
    session.connect()?;

    println!("{}", commands::HELP);
    tokio::select! {
        result = command_loop(session.clone(), lifecycle.clone(), connectivity.clone()) => {
            if let Err(e) = result {
                error!("명령 입력 에러: {e}");
            }
        }
        result = lifecycle.wait_for_signal() => {
            if let Err(e) = result {
                error!("시그널 핸들러 등록 실패: {e}");
            }
        }
    }

    session.shutdown().await;
    lifecycle.shutdown();
    info!("RIDELINK 클라이언트 종료");
    Ok(())
}
