//! 신뢰성 요청/응답
//!
//! 데이터그램 하나를 보내고 응답 하나를 기다림.
//! 타임아웃마다 대기 시간을 2배로 늘려 재전송, 정해진 횟수 후 포기.
//! 오래된 응답의 중복 제거는 하지 않음 (호출자가 내용 검증).

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::{Error, Result};

/// 최대 UDP 데이터그램 크기
const MAX_DATAGRAM_SIZE: usize = 65535;

/// 수신한 응답
#[derive(Debug, Clone)]
pub struct Reply {
    /// 응답 데이터그램
    pub data: Bytes,

    /// 응답을 보낸 주소
    pub from: SocketAddr,

    /// 응답을 받기까지 전송 횟수 (1 = 재전송 없음)
    pub attempts: u32,
}

/// 요청 전송 후 응답 대기 (지수 백오프 재전송)
pub async fn send_and_receive(
    socket: &UdpSocket,
    target: SocketAddr,
    message: &[u8],
    policy: &RetryPolicy,
    operation: &str,
) -> Result<Reply> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    for (attempt, timeout) in (1u32..).zip(policy.timeouts()) {
        socket.send_to(message, target).await?;

        match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                debug!("{} 응답 수신: {} bytes from {} (시도 {})", operation, len, from, attempt);
                return Ok(Reply {
                    data: Bytes::copy_from_slice(&buf[..len]),
                    from,
                    attempts: attempt,
                });
            }
            Ok(Err(e)) => {
                warn!("{} 수신 에러: {} (시도 {}/{})", operation, e, attempt, policy.max_attempts);
            }
            Err(_) => {
                warn!(
                    "{} 타임아웃: {:?} 대기 (시도 {}/{}), 재시도...",
                    operation, timeout, attempt, policy.max_attempts
                );
            }
        }
    }

    error!("{} 실패: 최대 재시도 횟수 도달", operation);
    Err(Error::Timeout {
        operation: operation.to_string(),
        attempts: policy.max_attempts,
    })
}
