//! 전송 드라이버 (클라이언트측)
//!
//! 파일 하나씩 순서대로:
//! 탐색 → 블록 요청 반복 → 로컬 파일 기록 → 종료 핸드쉐이크.
//! 요청은 항상 하나만 진행 중 (파이프라이닝 없음).

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::message::{Request, Response};
use crate::retry::send_and_receive;
use crate::stats::{BatchReport, TransferStats};
use crate::{Config, Error, Result};

/// 다음 블록 범위 계산 (양 끝 포함, 마지막 블록은 파일 끝에서 잘림)
///
/// `block_size`가 0이면 1로 취급.
pub fn block_range(offset: u64, file_size: u64, block_size: u64) -> (u64, u64) {
    let step = block_size.max(1);
    let end = offset
        .saturating_add(step - 1)
        .min(file_size.saturating_sub(1));
    (offset, end)
}

/// 파일 전체의 블록 범위 목록
///
/// `block_size`가 0이면 1로 취급.
pub fn block_ranges(file_size: u64, block_size: u64) -> impl Iterator<Item = (u64, u64)> {
    let step = usize::try_from(block_size.max(1)).unwrap_or(usize::MAX);
    (0..file_size)
        .step_by(step)
        .map(move |offset| block_range(offset, file_size, block_size))
}

/// BFP 클라이언트
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    config: Config,
}

impl Client {
    /// 서버 주소와 같은 주소 체계로 임시 포트 바인드
    pub async fn connect(server_addr: SocketAddr, config: Config) -> Result<Self> {
        if config.block_size == 0 || config.block_size > crate::MAX_BLOCK_SIZE as u64 {
            return Err(Error::InvalidArgument(format!(
                "block_size는 1..={} 범위여야 함: {}",
                crate::MAX_BLOCK_SIZE,
                config.block_size
            )));
        }

        let bind_addr: SocketAddr = if server_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        Ok(Self {
            socket,
            server_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 파일 목록 순서대로 다운로드
    ///
    /// 한 파일의 실패는 나머지 파일에 영향 없음
    pub async fn fetch_all<I, S>(&self, filenames: I) -> BatchReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = BatchReport::default();

        for filename in filenames {
            let filename = filename.as_ref();
            match self.fetch(filename).await {
                Ok(stats) => {
                    info!("{}", stats.summary());
                    report.succeeded.push(stats);
                }
                Err(e) => {
                    error!("다운로드 실패: {} - {}", filename, e);
                    report.failed.push((filename.to_string(), e));
                }
            }
        }

        report
    }

    /// 파일 하나 다운로드
    pub async fn fetch(&self, filename: &str) -> Result<TransferStats> {
        info!("Downloading '{}'", filename);

        let (file_size, data_port) = self.discover(filename).await?;
        let data_addr = SocketAddr::new(self.server_addr.ip(), data_port);
        info!("File size: {} bytes, data port: {}", file_size, data_port);

        let dest = self.destination(filename);
        let mut file = File::create(&dest).await?;
        let mut stats = TransferStats::new(filename, file_size);

        if let Err(e) = self
            .receive_blocks(filename, data_addr, &mut file, &mut stats)
            .await
        {
            drop(file);
            remove_partial(&dest).await;
            return Err(e);
        }
        stats.finish();
        info!("Download complete: {}", filename);

        stats.close_acked = self.close(filename, data_addr).await;
        Ok(stats)
    }

    fn destination(&self, filename: &str) -> PathBuf {
        self.config.dest_dir.join(filename)
    }

    /// DOWNLOAD 요청 → (파일 크기, 데이터 포트)
    async fn discover(&self, filename: &str) -> Result<(u64, u16)> {
        let request = Request::Download {
            filename: filename.to_string(),
        };
        self.discard_stale();
        let reply = send_and_receive(
            &self.socket,
            self.server_addr,
            &request.to_bytes(),
            &self.config.retry,
            "DOWNLOAD",
        )
        .await?;

        debug!("Server response: {}", String::from_utf8_lossy(&reply.data));

        match Response::from_bytes(&reply.data)? {
            Response::Found { filename: name, size, port } if name == filename => Ok((size, port)),
            Response::NotFound { filename: name } if name == filename => Err(Error::NotFound { filename: name }),
            other => Err(Error::UnexpectedResponse {
                expected: format!("OK/ERR {filename}"),
                got: format!("{} {}", other.kind(), other.filename()),
            }),
        }
    }

    /// 파일 끝까지 블록 요청 및 기록
    async fn receive_blocks(
        &self,
        filename: &str,
        data_addr: SocketAddr,
        file: &mut File,
        stats: &mut TransferStats,
    ) -> Result<()> {
        let file_size = stats.file_size;
        let mut received = 0u64;
        let mut mismatches = 0u32;
        let mut reported_decile = 0u64;

        while received < file_size {
            let (start, end) = block_range(received, file_size, self.config.block_size);
            let request = Request::Get {
                filename: filename.to_string(),
                start,
                end,
            };

            self.discard_stale();
            let reply = send_and_receive(
                &self.socket,
                data_addr,
                &request.to_bytes(),
                &self.config.retry,
                "FILE GET",
            )
            .await?;
            stats.record_request(reply.attempts);

            let payload = match validate_block(&reply.data, filename, start, end) {
                Ok(payload) => payload,
                Err(reason) => {
                    stats.record_mismatch();
                    mismatches += 1;
                    warn!(
                        "잘못된 데이터 응답 [{}-{}]: {} ({}/{})",
                        start, end, reason, mismatches, self.config.max_block_mismatches
                    );
                    if mismatches >= self.config.max_block_mismatches {
                        return Err(Error::MalformedResponse {
                            filename: filename.to_string(),
                            attempts: mismatches,
                        });
                    }
                    continue;
                }
            };
            mismatches = 0;

            file.write_all(&payload).await?;
            received += payload.len() as u64;
            stats.record_block(payload.len());

            let decile = received * 10 / file_size;
            if decile > reported_decile {
                reported_decile = decile;
                info!(
                    "Progress: [{}] {}/{} bytes ({:.0}%)",
                    filename,
                    received,
                    file_size,
                    stats.progress() * 100.0
                );
            }
        }

        file.flush().await?;
        Ok(())
    }

    /// CLOSE 핸드쉐이크, CLOSE_OK 수신 여부 반환
    ///
    /// 모든 바이트를 받은 뒤이므로 실패해도 경고만 남김
    async fn close(&self, filename: &str, data_addr: SocketAddr) -> bool {
        let request = Request::Close {
            filename: filename.to_string(),
        };
        self.discard_stale();

        let reply = send_and_receive(
            &self.socket,
            data_addr,
            &request.to_bytes(),
            &self.config.retry,
            "CLOSE",
        )
        .await;

        match reply.map(|r| Response::from_bytes(&r.data)) {
            Ok(Ok(Response::CloseOk { filename: name })) if name == filename => {
                info!("Connection closed: {}", filename);
                true
            }
            _ => {
                warn!("CLOSE_OK 미수신: {} 세션이 정상 종료되지 않았을 수 있음", filename);
                false
            }
        }
    }

    /// 이전 요청의 늦은 응답 버리기
    fn discard_stale(&self) {
        let mut buf = [0u8; 2048];
        while let Ok((len, from)) = self.socket.try_recv_from(&mut buf) {
            debug!("늦은 응답 폐기: {} bytes from {}", len, from);
        }
    }
}

/// 블록 응답 검증 (파일 이름, 범위, 길이)
fn validate_block(data: &[u8], filename: &str, start: u64, end: u64) -> std::result::Result<Bytes, String> {
    match Response::from_bytes(data) {
        Ok(Response::Data {
            filename: name,
            start: got_start,
            end: got_end,
            payload,
        }) => {
            if name != filename {
                Err(format!("파일 이름 불일치: {name}"))
            } else if (got_start, got_end) != (start, end) {
                Err(format!("범위 불일치: {got_start}-{got_end}"))
            } else if payload.len() as u64 != end - start + 1 {
                Err(format!("길이 불일치: {} bytes", payload.len()))
            } else {
                Ok(payload)
            }
        }
        Ok(other) => Err(format!("예상하지 못한 응답: {}", other.kind())),
        Err(e) => Err(e.to_string()),
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("불완전한 파일 삭제: {:?}", path),
        Err(e) => error!("불완전한 파일 삭제 실패: {:?} - {}", path, e),
    }
}
