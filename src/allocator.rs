//! 세션 할당자 (서버측)
//!
//! - well-known 포트에서 DOWNLOAD 요청 수신
//! - 파일 확인 후 전용 데이터 포트 할당
//! - 세션마다 블록 전송 워커 태스크 생성

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::fs::File;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::message::{Request, Response};
use crate::registry::PortRegistry;
use crate::worker::TransferWorker;
use crate::{Config, Result};

/// 활성 세션 정보
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// 세션 ID (포트 재사용 구분용)
    pub id: u64,
    pub filename: String,
    pub client_addr: SocketAddr,
    pub file_size: u64,
    pub started_at: Instant,
}

/// 서버 제어 핸들
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: CancellationToken,
    sessions: Arc<DashMap<u16, SessionInfo>>,
    registry: Arc<PortRegistry>,
}

impl ServerHandle {
    /// 서버와 모든 세션 종료
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 활성 세션 수
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// 활성 세션 목록 (데이터 포트, 정보)
    pub fn sessions(&self) -> Vec<(u16, SessionInfo)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// 사용 중 데이터 포트 수
    pub fn leased_ports(&self) -> usize {
        self.registry.in_use()
    }
}

/// BFP 서버
pub struct Server {
    socket: UdpSocket,
    config: Config,
    registry: Arc<PortRegistry>,
    sessions: Arc<DashMap<u16, SessionInfo>>,
    shutdown: CancellationToken,
    workers: JoinSet<()>,
    next_session_id: AtomicU64,
}

impl Server {
    /// well-known 포트 바인드
    pub async fn bind(addr: SocketAddr, config: Config) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let registry = PortRegistry::new(config.data_port_range.clone());

        Ok(Self {
            socket,
            config,
            registry,
            sessions: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            workers: JoinSet::new(),
            next_session_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            sessions: self.sessions.clone(),
            registry: self.registry.clone(),
        }
    }

    /// 수신 루프 실행 (종료 신호까지)
    pub async fn run(mut self) -> Result<()> {
        info!("BFP server listening on {}", self.local_addr()?);
        info!("File root: {:?}", self.config.root_dir);
        info!(
            "Data port range: {}-{}",
            self.config.data_port_range.start(),
            self.config.data_port_range.end()
        );

        let mut buf = vec![0u8; self.config.recv_buffer_size];

        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = tokio::time::timeout(self.config.poll_interval, self.socket.recv_from(&mut buf)) => result,
            };

            match received {
                Ok(Ok((len, from))) => self.handle_datagram(&buf[..len], from).await,
                Ok(Err(e)) => warn!("수신 에러: {}", e),
                Err(_) => {}
            }

            self.reap_workers();
        }

        info!("Server shutting down, waiting for {} session(s)", self.workers.len());
        while self.workers.join_next().await.is_some() {}
        Ok(())
    }

    async fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        let request = match Request::from_bytes(bytes) {
            Ok(request) => request,
            Err(e) => {
                warn!("잘못된 요청 from {}: {}", from, e);
                return;
            }
        };

        match request {
            Request::Download { filename } => {
                if let Err(e) = self.accept(filename, from).await {
                    warn!("DOWNLOAD 처리 실패 from {}: {}", from, e);
                }
            }
            other => {
                warn!("well-known 포트에 {} 요청 수신, 무시 (from {})", other.kind(), from);
            }
        }
    }

    async fn accept(&mut self, filename: String, client_addr: SocketAddr) -> Result<()> {
        let path = self.config.root_dir.join(&filename);

        let Some((file, file_size)) = open_regular_file(&path).await else {
            let response = Response::NotFound {
                filename: filename.clone(),
            };
            self.socket.send_to(&response.to_bytes(), client_addr).await?;
            info!("File not found: {} (requested by {})", filename, client_addr);
            return Ok(());
        };

        let ip = self.socket.local_addr()?.ip();
        let (lease, data_socket) = self.registry.bind(ip).await?;
        let port = lease.port();

        let response = Response::Found {
            filename: filename.clone(),
            size: file_size,
            port,
        };
        self.socket.send_to(&response.to_bytes(), client_addr).await?;

        info!(
            "Ready to send: {} (size {}B, data port {}, client {})",
            filename, file_size, port, client_addr
        );

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            port,
            SessionInfo {
                id,
                filename: filename.clone(),
                client_addr,
                file_size,
                started_at: Instant::now(),
            },
        );

        let worker = TransferWorker::new(
            filename,
            file,
            data_socket,
            lease,
            client_addr,
            self.config.session_idle_timeout,
            self.shutdown.child_token(),
        )
        .with_recv_buffer_size(self.config.recv_buffer_size);

        let sessions = self.sessions.clone();
        self.workers.spawn(async move {
            match worker.run().await {
                Ok(end) => debug!("세션 종료: port {} ({:?})", port, end),
                Err(e) => warn!("세션 에러: port {}: {}", port, e),
            }
            sessions.remove_if(&port, |_, info| info.id == id);
        });

        Ok(())
    }

    fn reap_workers(&mut self) {
        while let Some(result) = self.workers.try_join_next() {
            if let Err(e) = result {
                warn!("워커 태스크 비정상 종료: {}", e);
            }
        }
    }
}

/// 일반 파일이면 열고 크기 반환
async fn open_regular_file(path: &Path) -> Option<(File, u64)> {
    let file = File::open(path).await.ok()?;
    let metadata = file.metadata().await.ok()?;
    if !metadata.is_file() {
        return None;
    }
    Some((file, metadata.len()))
}
