//! 프로토콜 메시지 정의
//!
//! 와이어 포맷은 공백 구분 ASCII 텍스트.
//! 수신 즉시 `Request` / `Response`로 파싱하고 이후에는 타입으로만 다룸.
//!
//! | 방향 | 형식 |
//! |---|---|
//! | C→S | `DOWNLOAD <filename>` |
//! | S→C | `OK <filename> SIZE <bytes> PORT <port>` |
//! | S→C | `ERR <filename> NOT_FOUND` |
//! | C→S | `FILE <filename> GET START <start> END <end>` |
//! | S→C | `FILE <filename> OK START <start> END <end> DATA <base64>` |
//! | C→S | `FILE <filename> CLOSE` |
//! | S→C | `FILE <filename> CLOSE_OK` |
//!
//! 파일 이름에 공백이 있을 수 있으므로 고정된 앞/뒤 토큰 사이를 파일 이름으로 봄.
//! 이름 안의 연속 공백이나 탭은 원문 그대로 유지, 이름 앞뒤 공백은 보존되지 않음.

use std::str::FromStr;

use base64::Engine as _;
use bytes::Bytes;

use crate::{Error, Result};

/// 클라이언트 → 서버 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// 파일 탐색 요청 (well-known 포트)
    Download { filename: String },

    /// 바이트 범위 요청 (양 끝 포함)
    Get { filename: String, start: u64, end: u64 },

    /// 세션 종료 요청
    Close { filename: String },
}

impl Request {
    pub fn filename(&self) -> &str {
        match self {
            Request::Download { filename }
            | Request::Get { filename, .. }
            | Request::Close { filename } => filename,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Download { .. } => "DOWNLOAD",
            Request::Get { .. } => "GET",
            Request::Close { .. } => "CLOSE",
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        let text = match self {
            Request::Download { filename } => format!("DOWNLOAD {filename}"),
            Request::Get {
                filename,
                start,
                end,
            } => format!("FILE {filename} GET START {start} END {end}"),
            Request::Close { filename } => format!("FILE {filename} CLOSE"),
        };
        text.into_bytes()
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tokens = Tokens::parse(bytes)?;
        let n = tokens.len();

        match tokens.get(0) {
            "DOWNLOAD" if n >= 2 => Ok(Request::Download {
                filename: tokens.filename(1, n),
            }),
            "FILE" if n >= 3 && tokens.get(n - 1) == "CLOSE" => Ok(Request::Close {
                filename: tokens.filename(1, n - 1),
            }),
            "FILE"
                if n >= 7
                    && tokens.get(n - 5) == "GET"
                    && tokens.get(n - 4) == "START"
                    && tokens.get(n - 2) == "END" =>
            {
                let start: u64 = parse_field(tokens.get(n - 3), "START")?;
                let end: u64 = parse_field(tokens.get(n - 1), "END")?;
                if start > end {
                    return Err(Error::malformed(format!("역순 범위: {start} > {end}")));
                }
                Ok(Request::Get {
                    filename: tokens.filename(1, n - 5),
                    start,
                    end,
                })
            }
            other => Err(Error::malformed(format!("알 수 없는 요청: {other}"))),
        }
    }
}

/// 서버 → 클라이언트 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// 파일 있음, 데이터 포트 할당됨
    Found { filename: String, size: u64, port: u16 },

    /// 파일 없음
    NotFound { filename: String },

    /// 블록 데이터
    Data {
        filename: String,
        start: u64,
        end: u64,
        payload: Bytes,
    },

    /// 세션 종료 확인
    CloseOk { filename: String },
}

impl Response {
    pub fn filename(&self) -> &str {
        match self {
            Response::Found { filename, .. }
            | Response::NotFound { filename }
            | Response::Data { filename, .. }
            | Response::CloseOk { filename } => filename,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Response::Found { .. } => "OK",
            Response::NotFound { .. } => "ERR",
            Response::Data { .. } => "DATA",
            Response::CloseOk { .. } => "CLOSE_OK",
        }
    }

    /// 바이트로 직렬화
    ///
    /// 페이로드는 하나의 base64 토큰으로 인코딩
    pub fn to_bytes(&self) -> Vec<u8> {
        let text = match self {
            Response::Found {
                filename,
                size,
                port,
            } => format!("OK {filename} SIZE {size} PORT {port}"),
            Response::NotFound { filename } => format!("ERR {filename} NOT_FOUND"),
            Response::Data {
                filename,
                start,
                end,
                payload,
            } => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
                format!("FILE {filename} OK START {start} END {end} DATA {encoded}")
            }
            Response::CloseOk { filename } => format!("FILE {filename} CLOSE_OK"),
        };
        text.into_bytes()
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tokens = Tokens::parse(bytes)?;
        let n = tokens.len();

        match tokens.get(0) {
            "OK" if n >= 6 && tokens.get(n - 4) == "SIZE" && tokens.get(n - 2) == "PORT" => {
                Ok(Response::Found {
                    filename: tokens.filename(1, n - 4),
                    size: parse_field(tokens.get(n - 3), "SIZE")?,
                    port: parse_field(tokens.get(n - 1), "PORT")?,
                })
            }
            "ERR" if n >= 3 && tokens.get(n - 1) == "NOT_FOUND" => Ok(Response::NotFound {
                filename: tokens.filename(1, n - 1),
            }),
            "FILE" if n >= 3 && tokens.get(n - 1) == "CLOSE_OK" => Ok(Response::CloseOk {
                filename: tokens.filename(1, n - 1),
            }),
            "FILE"
                if n >= 9
                    && tokens.get(n - 7) == "OK"
                    && tokens.get(n - 6) == "START"
                    && tokens.get(n - 4) == "END"
                    && tokens.get(n - 2) == "DATA" =>
            {
                let payload = base64::engine::general_purpose::STANDARD.decode(tokens.get(n - 1))?;
                Ok(Response::Data {
                    filename: tokens.filename(1, n - 7),
                    start: parse_field(tokens.get(n - 5), "START")?,
                    end: parse_field(tokens.get(n - 3), "END")?,
                    payload: Bytes::from(payload),
                })
            }
            other => Err(Error::malformed(format!("알 수 없는 응답: {other}"))),
        }
    }
}

/// 공백 구분 토큰 (원문 위치 보존)
struct Tokens<'a> {
    text: &'a str,
    spans: Vec<(usize, usize)>,
}

impl<'a> Tokens<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::malformed(e.to_string()))?;

        // ASCII 공백은 UTF-8 멀티바이트 문자 안에 나타나지 않으므로 경계가 항상 문자 경계
        let mut spans = Vec::new();
        let mut start = None;
        for (i, b) in text.bytes().enumerate() {
            match (b.is_ascii_whitespace(), start) {
                (true, Some(s)) => {
                    spans.push((s, i));
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            spans.push((s, text.len()));
        }

        if spans.is_empty() {
            return Err(Error::malformed("빈 메시지"));
        }
        Ok(Self { text, spans })
    }

    fn len(&self) -> usize {
        self.spans.len()
    }

    fn get(&self, index: usize) -> &'a str {
        let (start, end) = self.spans[index];
        &self.text[start..end]
    }

    /// `from..to` 토큰을 원문 그대로 (사이 공백 유지)
    fn filename(&self, from: usize, to: usize) -> String {
        let start = self.spans[from].0;
        let end = self.spans[to - 1].1;
        self.text[start..end].to_string()
    }
}

fn parse_field<T: FromStr>(token: &str, field: &str) -> Result<T> {
    token
        .parse()
        .map_err(|_| Error::malformed(format!("{field} 값이 숫자가 아님: {token}")))
}
