//! 에러 타입 정의

use thiserror::Error;

/// BFP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("base64 디코딩 에러: {0}")]
    Base64(#[from] base64::DecodeError),

    /// 재시도 한도까지 응답 없음
    #[error("응답 타임아웃: {operation} ({attempts}회 시도)")]
    Timeout { operation: String, attempts: u32 },

    #[error("파일 없음: {filename}")]
    NotFound { filename: String },

    /// 수신한 데이터그램을 메시지로 해석할 수 없음
    #[error("잘못된 메시지: {reason}")]
    MalformedMessage { reason: String },

    /// 블록 응답이 연속으로 요청과 맞지 않음
    #[error("잘못된 블록 응답: {filename} ({attempts}회 연속)")]
    MalformedResponse { filename: String, attempts: u32 },

    #[error("예상하지 못한 응답: expected {expected}, got {got}")]
    UnexpectedResponse { expected: String, got: String },

    #[error("데이터 포트 고갈: {start}-{end}")]
    PortPoolExhausted { start: u16, end: u16 },

    #[error("잘못된 인자: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedMessage {
            reason: reason.into(),
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
