//! SRFT 클라이언트 (요청자) - Selective Repeat File Transfer
//!
//! 파일을 요청하고, 누락/손상 세그먼트만 재전송 요청해서 조립
//! - 검증(CRC + BLAKE3)이 끝난 뒤에만 출력 파일 기록
//! - `--drop` 으로 수신 손실 시뮬레이션
//!
//! 사용법:
//!   cargo run --release --bin srft-client -- [OPTIONS] --file <NAME>
//!
//! 예시:
//!   # 기본 수신 (Copy_abc.ext 로 저장)
//!   cargo run --release --bin srft-client -- -s 127.0.0.1:12000 -f abc.ext
//!
//!   # 세그먼트 3,7,12 손실 시뮬레이션
//!   cargo run --release --bin srft-client -- -s 127.0.0.1:12000 -f abc.ext --drop 3,7,12

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use srft::message::parse_sequence_list;
use srft::{Config, DropPlan, Requester};

/// SRFT Client - 선택적 재전송 UDP 파일 클라이언트
#[derive(Parser, Debug)]
#[command(name = "srft-client", version)]
struct Args {
    /// 서버 주소
    #[arg(short, long, default_value = "127.0.0.1:12000")]
    server: SocketAddr,

    /// 로컬 바인드 주소
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// 요청할 파일 이름
    #[arg(short, long)]
    file: String,

    /// 저장 경로 (기본: Copy_<파일 이름>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 최초 수신에서 버릴 시퀀스 (예: 3,7,12)
    #[arg(long, value_parser = parse_sequences)]
    drop: Option<SequenceList>,

    /// 재전송 단계에서 버릴 시퀀스
    #[arg(long, value_parser = parse_sequences)]
    drop_retry: Option<SequenceList>,

    /// 전송 종료 마커 버림
    #[arg(long)]
    drop_marker: bool,

    /// 최초 수신 무작위 손실률 (0.0 ~ 1.0)
    #[arg(long, default_value_t = 0.0)]
    loss_rate: f64,

    /// 무작위 손실 시드
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// 유휴 타임아웃 (밀리초)
    #[arg(long)]
    idle_timeout_ms: Option<u64>,

    /// 배치 타임아웃 (밀리초)
    #[arg(long)]
    batch_timeout_ms: Option<u64>,

    /// 최대 재전송 라운드
    #[arg(long)]
    retries: Option<u32>,

    /// RETR 배치 크기
    #[arg(long)]
    batch_size: Option<usize>,

    /// 수신할 최대 세그먼트 수
    #[arg(long)]
    max_segments: Option<u32>,

    /// 프리셋: default | lan | unstable (타임아웃/라운드)
    #[arg(long, default_value = "default")]
    preset: String,
}

/// `3,7,12` 형식 시퀀스 목록 인자
#[derive(Debug, Clone, Default)]
struct SequenceList(Vec<u32>);

fn parse_sequences(s: &str) -> Result<SequenceList, String> {
    parse_sequence_list(s)
        .map(SequenceList)
        .ok_or_else(|| format!("invalid sequence list: {}", s))
}

impl Args {
    fn config(&self) -> Config {
        let mut config = match self.preset.as_str() {
            "lan" => Config::lan(),
            "unstable" => Config::unstable_network(),
            _ => Config::default(),
        };
        if let Some(ms) = self.idle_timeout_ms {
            config.idle_timeout_ms = ms;
        }
        if let Some(ms) = self.batch_timeout_ms {
            config.batch_timeout_ms = ms;
        }
        if let Some(rounds) = self.retries {
            config.max_retry_rounds = rounds;
        }
        if let Some(size) = self.batch_size {
            config.retr_batch_size = size;
        }
        if let Some(limit) = self.max_segments {
            config.max_segments = limit;
        }
        config
    }

    fn drop_plan(&self) -> DropPlan {
        let mut plan = DropPlan::initial(self.drop.clone().unwrap_or_default().0)
            .with_retry(self.drop_retry.clone().unwrap_or_default().0)
            .with_random_loss(self.loss_rate, 0.0, self.seed);
        plan.drop_end_marker = self.drop_marker;
        plan
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
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("Copy_{}", args.file)));

    info!("SRFT Client starting...");
    info!("Server address: {}", args.server);

    let mut requester = Requester::connect(args.config(), args.bind, args.server).await?;
    requester.set_drop_plan(args.drop_plan());

    tokio::select! {
        result = requester.fetch_to_path(&args.file, &output) => {
            match result {
                Ok(file) => {
                    info!(
                        "'{}' received: {} bytes, {} segments, {} retry rounds",
                        file.name,
                        file.data.len(),
                        file.total_segments,
                        file.retry_rounds
                    );
                }
                Err(e) => {
                    error!("Transfer failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Exiting");
        }
    }

    Ok(())
}
