//! # BFP (Block Fetch Protocol)
//!
//! UDP 기반 요청/응답형 블록 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **탐색 + 전용 포트**: well-known 포트에서 파일 확인 후 세션별 데이터 포트 할당
//! - **바이트 범위 블록**: 클라이언트가 `[start, end]` 범위를 하나씩 요청
//! - **클라이언트 주도 재전송**: 타임아웃마다 2배 백오프, 5회 후 포기
//! - **세션 수명 관리**: CLOSE, 유휴 타임아웃, 서버 종료 시 워커 정리

pub mod allocator;
pub mod config;
pub mod driver;
pub mod error;
pub mod message;
pub mod registry;
pub mod retry;
pub mod stats;
pub mod worker;

pub use allocator::{Server, ServerHandle, SessionInfo};
pub use config::{Config, RetryPolicy};
pub use driver::Client;
pub use error::{Error, Result};
pub use message::{Request, Response};
pub use registry::{PortLease, PortRegistry};
pub use stats::{BatchReport, TransferStats};
pub use worker::{SessionEnd, TransferWorker};

/// 기본 블록 크기 (바이트)
pub const DEFAULT_BLOCK_SIZE: u64 = 1000;

/// 블록 최대 크기 (base64 인코딩 후에도 데이터그램 하나에 들어가는 크기)
pub const MAX_BLOCK_SIZE: usize = 32 * 1024;

/// 기본 최대 시도 횟수
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// 기본 데이터 포트 범위
pub const DEFAULT_DATA_PORT_RANGE: std::ops::RangeInclusive<u16> = 50000..=51000;
