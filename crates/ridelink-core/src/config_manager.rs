//! 설정 파일 저장소.
//!
//! 경로 결정 순서: `--config` 인자 → `RIDELINK_CONFIG` → 플랫폼 설정 디렉토리
//! (`<config home>/ridelink/config.json`). 파일이 없으면 기본값을 기록한다.
//! 저장은 임시 파일에 쓴 뒤 교체하므로 중간에 죽어도 이전 설정이 남는다.

use crate::config::AppConfig;
use crate::error::CoreError;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// 설정 파일 경로 환경 변수
pub const CONFIG_ENV: &str = "RIDELINK_CONFIG";

const APP_DIR: &str = "ridelink";
const FILE_NAME: &str = "config.json";

/// 공유 가능한 설정 핸들 (복제 시 같은 설정을 본다)
#[derive(Debug, Clone)]
pub struct ConfigManager {
    current: Arc<RwLock<AppConfig>>,
    path: PathBuf,
}

impl ConfigManager {
    /// 기본 위치의 설정 열기
    pub fn new() -> Result<Self, CoreError> {
        Self::with_path(default_path(|key| std::env::var(key).ok())?)
    }

    /// 지정 경로의 설정 열기 (없으면 기본값 기록)
    pub fn with_path(path: PathBuf) -> Result<Self, CoreError> {
        let config = match read_config(&path)? {
            Some(config) => config,
            None => {
                let config = AppConfig::default_config();
                write_config(&path, &config)?;
                info!("기본 설정 기록: {}", path.display());
                config
            }
        };
        Ok(Self {
            current: Arc::new(RwLock::new(config)),
            path,
        })
    }

    pub fn get(&self) -> AppConfig {
        self.current.read().clone()
    }

    pub fn config_path(&self) -> &Path {
        &self.path
    }

    /// 설정 교체. 검증 실패 시 파일과 메모리 모두 그대로.
    pub fn update(&self, config: AppConfig) -> Result<(), CoreError> {
        self.update_with(|current| *current = config).map(|_| ())
    }

    /// 현재 설정을 수정해 저장하고 결과 반환.
    ///
    /// 쓰기 잠금을 잡은 채 수정/검증/기록하므로 동시 수정이 서로를 덮어쓰지 않는다.
    pub fn update_with<F>(&self, edit: F) -> Result<AppConfig, CoreError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self.current.write();
        let mut next = guard.clone();
        edit(&mut next);
        next.validate()?;
        write_config(&self.path, &next)?;
        *guard = next.clone();
        debug!("설정 저장: {}", self.path.display());
        Ok(next)
    }

    /// 파일에서 다시 읽기. 파일이 사라졌으면 에러.
    pub fn reload(&self) -> Result<AppConfig, CoreError> {
        let config = read_config(&self.path)?.ok_or_else(|| {
            CoreError::Config(format!("설정 파일 없음: {}", self.path.display()))
        })?;
        *self.current.write() = config.clone();
        info!("설정 다시 로드: {}", self.path.display());
        Ok(config)
    }
}

/// 환경 변수 조회 함수로 기본 설정 경로 결정
pub fn default_path<F>(env: F) -> Result<PathBuf, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);
    if let Some(path) = var(CONFIG_ENV) {
        return Ok(path);
    }

    let home = if cfg!(target_os = "windows") {
        var("APPDATA")
    } else if cfg!(target_os = "macos") {
        var("HOME").map(|h| h.join("Library").join("Application Support"))
    } else {
        var("XDG_CONFIG_HOME").or_else(|| var("HOME").map(|h| h.join(".config")))
    };
    home.map(|dir| dir.join(APP_DIR).join(FILE_NAME))
        .ok_or_else(|| CoreError::Config("설정 디렉토리를 결정할 수 없음 (HOME 미설정)".into()))
}

/// 설정 파일 읽기. 파일이 없으면 `None`.
fn read_config(path: &Path) -> Result<Option<AppConfig>, CoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(config_io("읽기", path, e)),
    };
    let config: AppConfig = serde_json::from_str(&text)
        .map_err(|e| CoreError::Config(format!("{} 파싱 실패: {e}", path.display())))?;
    config.validate()?;
    Ok(Some(config))
}

/// 임시 파일에 기록 후 교체
fn write_config(path: &Path, config: &AppConfig) -> Result<(), CoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| config_io("디렉토리 생성", dir, e))?;
    }
    let text = serde_json::to_string_pretty(config)
        .map_err(|e| CoreError::Config(format!("설정 직렬화 실패: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text).map_err(|e| config_io("기록", &tmp, e))?;
    #[cfg(windows)]
    {
        // Windows rename은 대상이 있으면 실패
        if path.exists() {
            fs::remove_file(path).map_err(|e| config_io("교체", path, e))?;
        }
    }
    fs::rename(&tmp, path).map_err(|e| config_io("교체", path, e))
}

fn config_io(action: &str, path: &Path, err: std::io::Error) -> CoreError {
    CoreError::Config(format!("설정 {action} 실패: {}: {err}", path.display()))
}
