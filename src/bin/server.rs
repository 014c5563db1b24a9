//! SRFT 서버 (제공자) - Selective Repeat File Transfer
//!
//! 디렉터리의 파일을 요청자에게 세그먼트 단위로 전송
//! - GET: 전체 전송 + 종료 마커
//! - RETR: 지정 세그먼트만 재전송
//!
//! 사용법:
//!   cargo run --release --bin srft-server -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin srft-server -- --bind 0.0.0.0:12000 --dir ./files

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use srft::{Config, Provider};

/// SRFT Server - 선택적 재전송 UDP 파일 서버
#[derive(Parser, Debug)]
#[command(name = "srft-server", version)]
struct Args {
    /// 바인드 주소
    #[arg(short, long, default_value = "0.0.0.0:12000")]
    bind: SocketAddr,

    /// 제공할 파일 디렉터리
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// 세그먼트 페이로드 크기 (바이트)
    #[arg(long)]
    payload_size: Option<usize>,

    /// 세그먼트 전송 간격 (마이크로초)
    #[arg(long)]
    send_interval_us: Option<u64>,

    /// 캐시 유휴 만료 (밀리초)
    #[arg(long)]
    cache_ttl_ms: Option<u64>,

    /// 전송 종료 마커에 BLAKE3 다이제스트 생략
    #[arg(long)]
    no_digest: bool,

    /// 프리셋: default | lan | unstable
    #[arg(long, default_value = "default")]
    preset: String,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = match self.preset.as_str() {
            "lan" => Config::lan(),
            "unstable" => Config::unstable_network(),
            _ => Config::default(),
        };
        if let Some(size) = self.payload_size {
            config.payload_size = size;
        }
        if let Some(interval) = self.send_interval_us {
            config.send_interval_us = interval;
        }
        if let Some(ttl) = self.cache_ttl_ms {
            config.cache_ttl_ms = ttl;
        }
        if self.no_digest {
            config.send_digest = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = args.config();

    info!("SRFT Server starting...");
    info!("Payload size: {} bytes", config.payload_size);
    info!("Send interval: {} us", config.send_interval_us);

    let provider = Arc::new(Provider::bind(config, args.bind, args.dir.clone()).await?);

    let server = provider.clone();
    let mut run = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut run => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down.");
            provider.stop();
            run.await??;
        }
    }

    Ok(())
}
