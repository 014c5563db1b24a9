//! 프로토콜 설정

use std::time::Duration;

use crate::{Error, Result, DEFAULT_PAYLOAD_SIZE, MAX_PAYLOAD_SIZE};

/// SRFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 세그먼트당 페이로드 크기 (바이트, 송신측)
    /// 요청자는 MAX_PAYLOAD_SIZE 이하면 어떤 크기든 받는다
    pub payload_size: usize,

    /// 세그먼트 전송 간격 (마이크로초)
    /// 0이면 최대 속도로 전송 (로컬 버퍼 오버플로우 주의)
    pub send_interval_us: u64,

    /// 최초 수신 단계 유휴 타임아웃 (밀리초)
    /// 이 시간 동안 데이터그램이 없으면 단계 종료
    pub idle_timeout_ms: u64,

    /// 전송 종료 마커 수신 후 대기 시간 (밀리초)
    pub marker_grace_ms: u64,

    /// 재전송 배치당 대기 타임아웃 (밀리초)
    pub batch_timeout_ms: u64,

    /// RETR 요청 하나에 담을 최대 시퀀스 수
    pub retr_batch_size: usize,

    /// 최대 재전송 라운드 수
    pub max_retry_rounds: u32,

    /// 요청자가 받아들이는 최대 전체 세그먼트 수
    /// 헤더의 total 이 이보다 크면 그 데이터그램은 버린다
    pub max_segments: u32,

    /// 서버 캐시 유휴 만료 시간 (밀리초)
    pub cache_ttl_ms: u64,

    /// 서버 캐시 정리 주기 (밀리초)
    pub sweep_interval_ms: u64,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 전송 종료 마커에 전체 파일 BLAKE3 다이제스트 포함 여부
    pub send_digest: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payload_size: DEFAULT_PAYLOAD_SIZE,
            send_interval_us: 1000,          // 1ms
            idle_timeout_ms: 2000,           // 2초
            marker_grace_ms: 300,
            batch_timeout_ms: 1000,
            retr_batch_size: 128,
            max_retry_rounds: 8,
            max_segments: 1 << 22,           // 1024B 기준 4GiB
            cache_ttl_ms: 60_000,            // 1분
            sweep_interval_ms: 1000,
            recv_buffer_size: 65536,
            send_digest: true,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 로컬/LAN 환경용 설정
    pub fn lan() -> Self {
        Self {
            payload_size: 1400,
            send_interval_us: 50,
            idle_timeout_ms: 500,
            marker_grace_ms: 100,
            batch_timeout_ms: 250,
            retr_batch_size: 256,
            max_retry_rounds: 5,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            payload_size: 512,               // 작은 세그먼트
            send_interval_us: 2000,
            idle_timeout_ms: 5000,
            marker_grace_ms: 1000,
            batch_timeout_ms: 2000,
            retr_batch_size: 64,
            max_retry_rounds: 20,
            cache_ttl_ms: 300_000,
            ..Self::default()
        }
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_micros(self.send_interval_us)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn marker_grace(&self) -> Duration {
        Duration::from_millis(self.marker_grace_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.payload_size == 0 || self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidConfig(format!(
                "payload_size must be in 1..={}, got {}",
                MAX_PAYLOAD_SIZE, self.payload_size
            )));
        }
        if self.retr_batch_size == 0 {
            return Err(Error::InvalidConfig("retr_batch_size must be > 0".into()));
        }
        if self.max_segments == 0 {
            return Err(Error::InvalidConfig("max_segments must be > 0".into()));
        }
        if self.idle_timeout_ms == 0 || self.batch_timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeouts must be > 0".into()));
        }
        if self.recv_buffer_size < crate::HEADER_SIZE + self.payload_size {
            return Err(Error::InvalidConfig(format!(
                "recv_buffer_size {} smaller than one datagram",
                self.recv_buffer_size
            )));
        }
        Ok(())
    }
}
