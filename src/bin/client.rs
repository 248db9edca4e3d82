//! BFP 클라이언트 - Block Fetch Protocol
//!
//! 파일 목록의 파일을 하나씩 다운로드해 현재 디렉터리에 저장
//!
//! 사용법:
//!   cargo run --release --bin bfp-client -- <HOST> <PORT> <FILE_LIST>
//!
//! 예시:
//!   # files.txt 의 각 줄이 파일 이름
//!   cargo run --release --bin bfp-client -- 127.0.0.1 9000 files.txt

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bfp::{Client, Config};

const USAGE: &str = "Usage: bfp-client <hostname> <server port> <file list path>";

/// 클라이언트 설정
struct ClientConfig {
    hostname: String,
    port: u16,
    file_list: PathBuf,
}

fn parse_args() -> Result<ClientConfig, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().skip(1).any(|a| a == "--help" || a == "-h") {
        println!(
            r#"BFP Client - Block Fetch Protocol 클라이언트

{USAGE}

파일 목록: 한 줄에 파일 이름 하나 (빈 줄 무시)
저장 위치: 현재 디렉터리
로그 레벨: RUST_LOG 환경 변수 (기본: info)
"#
        );
        std::process::exit(0);
    }

    if args.len() != 4 {
        return Err(USAGE.to_string());
    }

    Ok(ClientConfig {
        hostname: args[1].clone(),
        port: args[2]
            .parse()
            .map_err(|_| format!("유효한 포트 번호 필요: {}", args[2]))?,
        file_list: PathBuf::from(&args[3]),
    })
}

/// 파일 목록 읽기 (앞뒤 공백 제거, 빈 줄 무시)
fn read_file_list(path: &Path) -> Result<Vec<String>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("파일 목록을 읽을 수 없음: {:?} - {}", path, e))?;

    let names: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    if names.is_empty() {
        return Err(format!("파일 목록이 비어 있음: {:?}", path));
    }
    Ok(names)
}

async fn resolve(hostname: &str, port: u16) -> Result<SocketAddr, String> {
    tokio::net::lookup_host((hostname, port))
        .await
        .map_err(|e| format!("호스트 이름 해석 실패: {} - {}", hostname, e))?
        .next()
        .ok_or_else(|| format!("호스트 이름 해석 실패: {}", hostname))
}

fn fail(msg: impl std::fmt::Display) -> ! {
    error!("{}", msg);
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client_config = parse_args().unwrap_or_else(|msg| fail(msg));
    let filenames = read_file_list(&client_config.file_list).unwrap_or_else(|msg| fail(msg));
    let server_addr = resolve(&client_config.hostname, client_config.port)
        .await
        .unwrap_or_else(|msg| fail(msg));

    let client = Client::connect(server_addr, Config::default())
        .await
        .unwrap_or_else(|e| fail(e));

    info!("BFP Client starting...");
    info!("Server address: {}", server_addr);
    info!("Bound to local address: {}", client.local_addr()?);
    info!("Downloading {} file(s)", filenames.len());

    let report = client.fetch_all(&filenames).await;

    info!("{}", report.summary());
    if !report.all_succeeded() {
        warn!("{} file(s) failed", report.failed.len());
    }
    Ok(())
}
