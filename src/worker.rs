//! 블록 전송 워커 (서버측)
//!
//! 세션 하나당 워커 하나. 전용 데이터 포트와 파일 핸들을 소유하고
//! 바이트 범위 요청과 종료 요청을 처리함.

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::message::{Request, Response};
use crate::registry::PortLease;
use crate::{Result, MAX_BLOCK_SIZE};

/// 세션 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// 클라이언트 CLOSE 수신
    Closed,

    /// 유휴 타임아웃
    IdleTimeout,

    /// 서버 종료
    Cancelled,
}

/// 블록 전송 워커
pub struct TransferWorker {
    filename: String,
    file: File,
    socket: UdpSocket,
    client_addr: SocketAddr,
    idle_timeout: Duration,
    recv_buffer_size: usize,
    cancel: CancellationToken,
    lease: PortLease,
}

impl TransferWorker {
    pub fn new(
        filename: String,
        file: File,
        socket: UdpSocket,
        lease: PortLease,
        client_addr: SocketAddr,
        idle_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            filename,
            file,
            socket,
            client_addr,
            idle_timeout,
            recv_buffer_size: 4096,
            cancel,
            lease,
        }
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn port(&self) -> u16 {
        self.lease.port()
    }

    /// 세션 루프 실행
    ///
    /// CLOSE, 유휴 타임아웃, 취소 중 하나로 끝남.
    /// 반환 시 소켓과 파일 핸들, 포트가 모두 해제됨.
    pub async fn run(mut self) -> Result<SessionEnd> {
        info!(
            "Data worker started: port {}, file {}, client {}",
            self.port(),
            self.filename,
            self.client_addr
        );

        let mut buf = vec![0u8; self.recv_buffer_size];

        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("세션 취소: {} (port {})", self.filename, self.port());
                    return Ok(SessionEnd::Cancelled);
                }
                result = tokio::time::timeout(self.idle_timeout, self.socket.recv_from(&mut buf)) => result,
            };

            let (len, from) = match received {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => {
                    warn!("데이터 포트 수신 에러: {}", e);
                    continue;
                }
                Err(_) => {
                    info!(
                        "세션 유휴 타임아웃: {} (port {}, {:?})",
                        self.filename,
                        self.port(),
                        self.idle_timeout
                    );
                    return Ok(SessionEnd::IdleTimeout);
                }
            };

            let request = match Request::from_bytes(&buf[..len]) {
                Ok(request) => request,
                Err(e) => {
                    warn!("잘못된 데이터 요청 from {}: {}", from, e);
                    continue;
                }
            };

            if request.filename() != self.filename {
                debug!(
                    "다른 파일 요청 무시: {} (세션 파일: {})",
                    request.filename(),
                    self.filename
                );
                continue;
            }

            match request {
                Request::Get { start, end, .. } => self.serve_block(start, end).await?,
                Request::Close { .. } => {
                    let ack = Response::CloseOk {
                        filename: self.filename.clone(),
                    };
                    self.socket.send_to(&ack.to_bytes(), self.client_addr).await?;
                    info!("Transfer complete: {} (client {})", self.filename, self.client_addr);
                    return Ok(SessionEnd::Closed);
                }
                Request::Download { .. } => {
                    debug!("데이터 포트에 DOWNLOAD 수신, 무시");
                }
            }
        }
    }

    /// 범위 읽기 후 응답
    ///
    /// 요청 길이만큼 읽지 못하면 아무것도 보내지 않음 (클라이언트가 재시도)
    async fn serve_block(&mut self, start: u64, end: u64) -> Result<()> {
        let Some(wanted) = end.checked_sub(start).and_then(|d| d.checked_add(1)) else {
            warn!("잘못된 블록 범위: {}-{}", start, end);
            return Ok(());
        };
        if wanted > MAX_BLOCK_SIZE as u64 {
            warn!("블록 크기 초과: {} bytes (최대 {})", wanted, MAX_BLOCK_SIZE);
            return Ok(());
        }

        let data = match self.read_range(start, wanted as usize).await {
            Ok(data) => data,
            Err(e) => {
                warn!("블록 읽기 실패: {} (위치 {})", e, start);
                return Ok(());
            }
        };

        if data.len() as u64 != wanted {
            warn!(
                "블록 읽기 실패: 예상 {}B, 실제 {}B (위치 {})",
                wanted,
                data.len(),
                start
            );
            return Ok(());
        }

        let response = Response::Data {
            filename: self.filename.clone(),
            start,
            end,
            payload: Bytes::from(data),
        };
        self.socket
            .send_to(&response.to_bytes(), self.client_addr)
            .await?;
        Ok(())
    }

    async fn read_range(&mut self, start: u64, len: usize) -> std::io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(start)).await?;

        let mut data = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.file.read(&mut data[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PortRegistry;
    use std::io::Write;

    struct Harness {
        client: UdpSocket,
        data_addr: SocketAddr,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<Result<SessionEnd>>,
        _dir: tempfile::TempDir,
    }

    async fn start_worker(contents: &[u8], idle_timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::File::create(&path).unwrap().write_all(contents).unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let registry = PortRegistry::new(46000..=46999);
        let (lease, socket) = registry.bind("127.0.0.1".parse().unwrap()).await.unwrap();
        let data_addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let worker = TransferWorker::new(
            "a.txt".into(),
            File::open(&path).await.unwrap(),
            socket,
            lease,
            client.local_addr().unwrap(),
            idle_timeout,
            cancel.child_token(),
        );
        let handle = tokio::spawn(worker.run());

        Harness {
            client,
            data_addr,
            cancel,
            handle,
            _dir: dir,
        }
    }

    async fn exchange(h: &Harness, request: Request) -> Option<Response> {
        h.client.send_to(&request.to_bytes(), h.data_addr).await.unwrap();
        let mut buf = vec![0u8; 65535];
        match tokio::time::timeout(Duration::from_millis(200), h.client.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(Response::from_bytes(&buf[..len]).unwrap()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_serves_ranges_and_closes() {
        let contents: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let h = start_worker(&contents, Duration::from_secs(5)).await;

        let response = exchange(
            &h,
            Request::Get {
                filename: "a.txt".into(),
                start: 2000,
                end: 2499,
            },
        )
        .await;
        match response {
            Some(Response::Data { start, end, payload, .. }) => {
                assert_eq!((start, end), (2000, 2499));
                assert_eq!(payload.as_ref(), &contents[2000..2500]);
            }
            other => panic!("Expected Data, got {other:?}"),
        }

        let response = exchange(&h, Request::Close { filename: "a.txt".into() }).await;
        assert_eq!(response, Some(Response::CloseOk { filename: "a.txt".into() }));

        assert_eq!(h.handle.await.unwrap().unwrap(), SessionEnd::Closed);
    }

    #[tokio::test]
    async fn test_full_u64_range_is_dropped() {
        let contents = b"0123456789";
        let h = start_worker(contents, Duration::from_secs(5)).await;

        // 0..=u64::MAX 는 길이가 u64 범위를 넘음
        h.client
            .send_to(b"FILE a.txt GET START 0 END 18446744073709551615", h.data_addr)
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        assert!(
            tokio::time::timeout(Duration::from_millis(200), h.client.recv_from(&mut buf))
                .await
                .is_err()
        );

        // 같은 세션이 계속 응답
        let response = exchange(
            &h,
            Request::Get {
                filename: "a.txt".into(),
                start: 2,
                end: 5,
            },
        )
        .await;
        match response {
            Some(Response::Data { payload, .. }) => assert_eq!(payload.as_ref(), b"2345"),
            other => panic!("Expected Data, got {other:?}"),
        }

        let response = exchange(&h, Request::Close { filename: "a.txt".into() }).await;
        assert_eq!(response, Some(Response::CloseOk { filename: "a.txt".into() }));
        assert_eq!(h.handle.await.unwrap().unwrap(), SessionEnd::Closed);
    }

    #[tokio::test]
    async fn test_short_read_sends_nothing() {
        let h = start_worker(b"0123456789", Duration::from_secs(5)).await;

        let response = exchange(
            &h,
            Request::Get {
                filename: "a.txt".into(),
                start: 5,
                end: 14,
            },
        )
        .await;
        assert!(response.is_none());

        h.cancel.cancel();
        assert_eq!(h.handle.await.unwrap().unwrap(), SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_other_filename_ignored() {
        let h = start_worker(b"0123456789", Duration::from_secs(5)).await;

        let response = exchange(&h, Request::Close { filename: "b.txt".into() }).await;
        assert!(response.is_none());
        assert!(!h.handle.is_finished());

        h.cancel.cancel();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_session() {
        let h = start_worker(b"0123456789", Duration::from_millis(100)).await;
        let end = tokio::time::timeout(Duration::from_secs(2), h.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::IdleTimeout);
    }
}
