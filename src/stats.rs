//! 전송 통계

use std::time::{Duration, Instant};

/// 전체 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 전송(요청) 파일 수
    pub total_transfers: u64,

    /// 총 세그먼트 수 (파일 기준)
    pub total_segments: u64,

    /// 송신 세그먼트 수 (최초 전송)
    pub segments_sent: u64,

    /// 재전송 세그먼트 수
    pub retransmitted_segments: u64,

    /// 유효 수신 세그먼트 수
    pub received_segments: u64,

    /// 중복 수신 세그먼트 수
    pub duplicate_segments: u64,

    /// CRC 불일치 세그먼트 수
    pub corrupted_segments: u64,

    /// 디코드 실패 데이터그램 수
    pub decode_errors: u64,

    /// total 이 허용 범위를 넘어 버린 데이터그램 수
    pub rejected_totals: u64,

    /// 밀린(이전 전송의) 데이터그램 폐기 수
    pub stale_datagrams: u64,

    /// 시뮬레이션 드롭 수
    pub simulated_drops: u64,

    /// RETR 요청 수
    pub retr_requests: u64,

    /// 재전송 라운드 수
    pub retry_rounds: u32,

    /// 범위 밖 재전송 요청 시퀀스 수
    pub out_of_range_requests: u64,

    /// 총 페이로드 바이트
    pub total_bytes: u64,
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_transfers: 0,
            total_segments: 0,
            segments_sent: 0,
            retransmitted_segments: 0,
            received_segments: 0,
            duplicate_segments: 0,
            corrupted_segments: 0,
            decode_errors: 0,
            rejected_totals: 0,
            stale_datagrams: 0,
            simulated_drops: 0,
            retr_requests: 0,
            retry_rounds: 0,
            out_of_range_requests: 0,
            total_bytes: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 처리율 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 재전송 비율 (재전송 / 전체 송신)
    pub fn retransmit_ratio(&self) -> f64 {
        let total = self.segments_sent + self.retransmitted_segments;
        if total == 0 {
            return 0.0;
        }
        self.retransmitted_segments as f64 / total as f64
    }

    /// 수신측 손상률
    pub fn corruption_rate(&self) -> f64 {
        let total = self.received_segments + self.corrupted_segments;
        if total == 0 {
            return 0.0;
        }
        self.corrupted_segments as f64 / total as f64
    }

    /// 한 줄 요약
    pub fn summary(&self) -> String {
        format!(
            "segments={} received={} sent={} retransmitted={} corrupted={} duplicates={} \
             decode_errors={} rejected_totals={} stale={} dropped={} rounds={} bytes={} \
             elapsed={:.2}s throughput={:.2} MB/s",
            self.total_segments,
            self.received_segments,
            self.segments_sent,
            self.retransmitted_segments,
            self.corrupted_segments,
            self.duplicate_segments,
            self.decode_errors,
            self.rejected_totals,
            self.stale_datagrams,
            self.simulated_drops,
            self.retry_rounds,
            self.total_bytes,
            self.elapsed().as_secs_f64(),
            self.overall_throughput() / 1_000_000.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios() {
        let mut stats = TransferStats::new();
        assert_eq!(stats.retransmit_ratio(), 0.0);
        assert_eq!(stats.corruption_rate(), 0.0);

        stats.segments_sent = 8;
        stats.retransmitted_segments = 2;
        assert!((stats.retransmit_ratio() - 0.2).abs() < f64::EPSILON);

        stats.received_segments = 9;
        stats.corrupted_segments = 1;
        assert!((stats.corruption_rate() - 0.1).abs() < f64::EPSILON);
        assert!(stats.summary().contains("retransmitted=2"));
    }
}
