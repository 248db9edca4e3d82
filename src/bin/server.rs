//! BFP 서버 - Block Fetch Protocol
//!
//! well-known 포트에서 DOWNLOAD 요청을 받고
//! 파일마다 전용 데이터 포트를 열어 블록 요청에 응답
//!
//! 사용법:
//!   cargo run --release --bin bfp-server -- <PORT>
//!
//! 예시:
//!   # 현재 디렉터리의 파일 제공
//!   cargo run --release --bin bfp-server -- 9000
//!
//!   # 디버그 로그
//!   RUST_LOG=debug cargo run --release --bin bfp-server -- 9000

use std::net::{Ipv4Addr, SocketAddr};

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bfp::{Config, Server};

const USAGE: &str = "Usage: bfp-server <listening port>";

fn parse_args() -> Result<u16, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().skip(1).any(|a| a == "--help" || a == "-h") {
        println!(
            r#"BFP Server - Block Fetch Protocol 서버

{USAGE}

현재 디렉터리 기준으로 파일을 찾아 전송
데이터 포트: 50000-51000 (세션마다 무작위 할당)
로그 레벨: RUST_LOG 환경 변수 (기본: info)
"#
        );
        std::process::exit(0);
    }

    if args.len() != 2 {
        return Err(USAGE.to_string());
    }

    args[1]
        .parse()
        .map_err(|_| format!("유효한 포트 번호 필요: {}", args[1]))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let port = match parse_args() {
        Ok(port) => port,
        Err(msg) => {
            error!("{}", msg);
            std::process::exit(1);
        }
    };

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let server = match Server::bind(bind_addr, Config::default()).await {
        Ok(server) => server,
        Err(e) => {
            error!("바인드 실패 {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down...");
            handle.shutdown();
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
