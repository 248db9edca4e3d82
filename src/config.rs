//! 프로토콜 설정

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use crate::{DEFAULT_BLOCK_SIZE, DEFAULT_DATA_PORT_RANGE, DEFAULT_MAX_ATTEMPTS};

/// 재전송 정책 (지수 백오프)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 첫 시도 대기 시간
    pub initial_timeout: Duration,

    /// 총 시도 횟수 (첫 전송 포함)
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_secs(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            initial_timeout,
            max_attempts,
        }
    }

    /// 시도별 대기 시간 (매 시도마다 2배)
    pub fn timeouts(&self) -> impl Iterator<Item = Duration> {
        let initial = self.initial_timeout;
        (0..self.max_attempts).map(move |attempt| initial.saturating_mul(1u32 << attempt.min(31)))
    }

    /// 모든 시도가 실패할 때까지 걸리는 총 시간
    pub fn total_budget(&self) -> Duration {
        self.timeouts().fold(Duration::ZERO, |acc, t| acc.saturating_add(t))
    }
}

/// BFP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 요청/응답 재전송 정책
    pub retry: RetryPolicy,

    /// 블록 크기 (바이트)
    pub block_size: u64,

    /// 세션별 데이터 포트 범위 (양 끝 포함)
    pub data_port_range: RangeInclusive<u16>,

    /// 서버 수신 루프 폴링 간격
    /// 종료 신호 확인 주기
    pub poll_interval: Duration,

    /// 세션 유휴 타임아웃
    /// 이 시간 동안 요청이 없으면 워커 종료
    pub session_idle_timeout: Duration,

    /// 연속 블록 응답 불일치 허용 횟수
    pub max_block_mismatches: u32,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 서버 파일 루트
    pub root_dir: PathBuf,

    /// 클라이언트 저장 디렉터리
    pub dest_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            data_port_range: DEFAULT_DATA_PORT_RANGE,
            poll_interval: Duration::from_secs(1),
            session_idle_timeout: Duration::from_secs(60),
            max_block_mismatches: 5,
            recv_buffer_size: 8192,
            root_dir: PathBuf::from("."),
            dest_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 파일 크기에 필요한 블록 수
    pub fn blocks_for(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.block_size)
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            retry: RetryPolicy::new(Duration::from_secs(2), 7),
            block_size: 512,
            max_block_mismatches: 10,
            session_idle_timeout: Duration::from_secs(300),
            ..Self::default()
        }
    }

    /// 루프백용 설정 (짧은 타임아웃)
    pub fn local() -> Self {
        Self {
            retry: RetryPolicy::new(Duration::from_millis(50), DEFAULT_MAX_ATTEMPTS),
            poll_interval: Duration::from_millis(50),
            session_idle_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// 파일 루트 지정
    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    /// 저장 디렉터리 지정
    pub fn with_dest_dir(mut self, dest_dir: impl Into<PathBuf>) -> Self {
        self.dest_dir = dest_dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        let secs: Vec<u64> = policy.timeouts().map(|t| t.as_secs()).collect();

        assert_eq!(secs, vec![1, 2, 4, 8, 16]);
        assert_eq!(policy.total_budget(), Duration::from_secs(31));
    }

    #[test]
    fn test_blocks_for() {
        let config = Config::default();

        assert_eq!(config.blocks_for(0), 0);
        assert_eq!(config.blocks_for(1), 1);
        assert_eq!(config.blocks_for(1000), 1);
        assert_eq!(config.blocks_for(2500), 3);
    }
}
