//! 요청자 (클라이언트측)
//!
//! - GET 요청 후 세그먼트 수신, 희소 저장소에 보관
//! - 누락/손상 시퀀스만 RETR 로 배치 요청
//! - 라운드 한도 안에서 누락 집합이 빌 때까지 반복
//!
//! 상태: `Requesting -> ReceivingInitial -> (Complete | Retrying) -> (Complete | Exhausted)`

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::message::{format_sequence_list, ControlMessage, ErrorMessage};
use crate::segment::{DecodeError, FrameKind, Segment, SequenceNumber, TransferDescriptor};
use crate::segmenter::{in_range, SegmentStore};
use crate::stats::TransferStats;
use crate::transport::{drain, is_transient, recv_until};
use crate::{Config, Error, Result, MAX_PAYLOAD_SIZE};

/// 요청자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterPhase {
    /// 요청 전
    Idle,

    /// GET 전송
    Requesting,

    /// 최초 수신 단계
    ReceivingInitial,

    /// 재전송 라운드 진행 중
    Retrying { round: u32 },

    /// 조립 및 검증 완료
    Complete,

    /// 재전송 한도 소진
    Exhausted,

    /// 프로토콜/무결성 에러로 중단
    Failed,
}

/// 드롭 시뮬레이션이 적용되는 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPhase {
    Initial,
    Retry,
}

/// 수신 손실 시뮬레이션 계획 (테스트용)
///
/// 지정된 시퀀스는 해당 단계에서 처음 도착할 때 한 번 버린다.
/// 단계별 집합/손실률이 비어 있으면 그 단계는 시뮬레이션 없음.
#[derive(Debug, Clone, Default)]
pub struct DropPlan {
    /// 최초 수신 단계에서 버릴 시퀀스
    pub initial: BTreeSet<SequenceNumber>,

    /// 재전송 단계에서 버릴 시퀀스
    pub retry: BTreeSet<SequenceNumber>,

    /// 전송 종료 마커를 항상 버림
    pub drop_end_marker: bool,

    /// 최초 수신 단계 무작위 손실률 (0.0 ~ 1.0)
    pub initial_loss_rate: f64,

    /// 재전송 단계 무작위 손실률 (0.0 ~ 1.0)
    pub retry_loss_rate: f64,

    /// 무작위 손실 시드
    pub seed: u64,
}

impl DropPlan {
    pub fn none() -> Self {
        Self::default()
    }

    /// 최초 수신 단계 드롭 집합
    pub fn initial(sequences: impl IntoIterator<Item = SequenceNumber>) -> Self {
        Self {
            initial: sequences.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, sequences: impl IntoIterator<Item = SequenceNumber>) -> Self {
        self.retry = sequences.into_iter().collect();
        self
    }

    pub fn with_end_marker_dropped(mut self) -> Self {
        self.drop_end_marker = true;
        self
    }

    pub fn with_random_loss(mut self, initial: f64, retry: f64, seed: u64) -> Self {
        self.initial_loss_rate = initial;
        self.retry_loss_rate = retry;
        self.seed = seed;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.initial.is_empty()
            && self.retry.is_empty()
            && !self.drop_end_marker
            && self.initial_loss_rate <= 0.0
            && self.retry_loss_rate <= 0.0
    }
}

/// 전송 하나 동안의 드롭 상태
#[derive(Debug)]
struct DropSimulator {
    initial: BTreeSet<SequenceNumber>,
    retry: BTreeSet<SequenceNumber>,
    drop_end_marker: bool,
    initial_loss_rate: f64,
    retry_loss_rate: f64,
    rng: StdRng,
}

impl DropSimulator {
    fn new(plan: &DropPlan) -> Self {
        Self {
            initial: plan.initial.clone(),
            retry: plan.retry.clone(),
            drop_end_marker: plan.drop_end_marker,
            initial_loss_rate: plan.initial_loss_rate.clamp(0.0, 1.0),
            retry_loss_rate: plan.retry_loss_rate.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(plan.seed),
        }
    }

    fn drop_segment(&mut self, phase: DropPhase, sequence: SequenceNumber) -> bool {
        let (set, rate) = match phase {
            DropPhase::Initial => (&mut self.initial, self.initial_loss_rate),
            DropPhase::Retry => (&mut self.retry, self.retry_loss_rate),
        };
        if set.remove(&sequence) {
            return true;
        }
        rate > 0.0 && self.rng.gen_bool(rate)
    }

    fn drop_marker(&self) -> bool {
        self.drop_end_marker
    }
}

/// 현재 전송 상태
#[derive(Debug)]
struct Transfer {
    name: String,

    /// 전체 세그먼트 수 (데이터 헤더나 종료 마커에서 학습)
    total: Option<u32>,

    descriptor: Option<TransferDescriptor>,

    marker_seen: bool,

    drops: DropSimulator,
}

impl Transfer {
    fn new(name: &str, plan: &DropPlan) -> Self {
        Self {
            name: name.to_string(),
            total: None,
            descriptor: None,
            marker_seen: false,
            drops: DropSimulator::new(plan),
        }
    }

    fn is_complete(&self, store: &SegmentStore) -> bool {
        self.total
            .map(|total| store.valid_count() >= total as usize)
            .unwrap_or(false)
    }
}

/// 수신 데이터그램 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Stored,
    Duplicate,
    Corrupted,
    Discarded,
    Dropped,
    EndOfTransfer,
    BatchComplete,
}

/// 수신 완료된 파일
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub name: String,
    pub data: Bytes,
    pub total_segments: u32,

    /// 서버가 보낸 디스크립터 (검증 완료)
    pub descriptor: Option<TransferDescriptor>,

    pub retry_rounds: u32,
}

/// 중단 시 서버에 DONE 을 보내는 가드
///
/// fetch 퓨처가 중간에 drop 되면 논블로킹 전송으로 서버 캐시를 해제시킨다.
struct DoneGuard {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    message: Vec<u8>,
    armed: bool,
}

impl DoneGuard {
    fn new(socket: Arc<UdpSocket>, server_addr: SocketAddr, name: &str) -> Self {
        Self {
            socket,
            server_addr,
            message: ControlMessage::Done { name: name.to_string() }.to_bytes(),
            armed: true,
        }
    }

    async fn finish(mut self) {
        self.armed = false;
        if let Err(e) = self.socket.send_to(&self.message, self.server_addr).await {
            debug!("DONE 전송 실패: {}", e);
        }
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.socket.try_send_to(&self.message, self.server_addr) {
                debug!("DONE 전송 실패 (취소): {}", e);
            }
        }
    }
}

/// 로그용 누락 목록 (앞부분만)
fn preview(sequences: &[SequenceNumber]) -> String {
    const SHOWN: usize = 32;
    if sequences.len() <= SHOWN {
        format_sequence_list(sequences)
    } else {
        format!(
            "{},... ({} total)",
            format_sequence_list(&sequences[..SHOWN]),
            sequences.len()
        )
    }
}

/// 요청자
pub struct Requester {
    config: Config,
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    store: SegmentStore,
    transfer: Option<Transfer>,
    phase: RequesterPhase,
    stats: TransferStats,
    drop_plan: DropPlan,
    buf: Vec<u8>,
}

impl Requester {
    /// 소켓 바인딩
    pub async fn connect(config: Config, bind_addr: SocketAddr, server_addr: SocketAddr) -> Result<Self> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        info!("Bound to local address: {}, server: {}", socket.local_addr()?, server_addr);

        Ok(Self {
            buf: vec![0u8; config.recv_buffer_size],
            config,
            socket,
            server_addr,
            store: SegmentStore::new(),
            transfer: None,
            phase: RequesterPhase::Idle,
            stats: TransferStats::new(),
            drop_plan: DropPlan::none(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 드롭 시뮬레이션 설정 (다음 fetch 부터 적용)
    pub fn set_drop_plan(&mut self, plan: DropPlan) {
        if !plan.is_empty() {
            info!("Simulating drops: initial={:?} retry={:?}", plan.initial, plan.retry);
        }
        self.drop_plan = plan;
    }

    pub fn phase(&self) -> RequesterPhase {
        self.phase
    }

    /// 마지막 전송 통계
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 마지막 전송의 전체 세그먼트 수
    pub fn total_segments(&self) -> Option<u32> {
        self.transfer.as_ref().and_then(|t| t.total)
    }

    /// 현재 누락 집합 (total 을 모르면 None)
    pub fn outstanding(&self) -> Option<Vec<SequenceNumber>> {
        self.total_segments().map(|total| self.store.outstanding(total))
    }

    /// 파일 수신 (메모리)
    pub async fn fetch(&mut self, name: &str) -> Result<FetchedFile> {
        self.store.clear();
        self.stats = TransferStats::new();
        self.stats.total_transfers = 1;
        self.transfer = Some(Transfer::new(name, &self.drop_plan));

        // 이전 전송에서 늦게 도착한 프레임이 새 전송을 오염시키지 않도록
        let stale = drain(&self.socket, &mut self.buf).await;
        if stale > 0 {
            debug!("Discarded {} stale datagrams before GET", stale);
        }
        self.stats.stale_datagrams = stale as u64;

        let guard = DoneGuard::new(self.socket.clone(), self.server_addr, name);
        let result = self.run_transfer(name).await;
        guard.finish().await;

        match &result {
            Ok(file) => info!(
                "Transfer '{}' complete: {} bytes, {}",
                file.name,
                file.data.len(),
                self.stats.summary()
            ),
            Err(e) => warn!("Transfer '{}' failed: {} ({})", name, e, self.stats.summary()),
        }
        result
    }

    /// 파일 수신 후 검증이 끝난 경우에만 저장
    ///
    /// 임시 파일에 쓰고 rename 하므로 출력 경로에 부분 파일이 남지 않는다.
    pub async fn fetch_to_path(&mut self, name: &str, output: &Path) -> Result<FetchedFile> {
        let file = self.fetch(name).await?;

        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        let tmp = output.with_file_name(format!(".{}.part", file_name));

        if let Err(e) = tokio::fs::write(&tmp, &file.data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, output).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!("File built and saved in {}", output.display());
        Ok(file)
    }

    fn set_phase(&mut self, phase: RequesterPhase) {
        if self.phase != phase {
            debug!("phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    async fn send_control(&mut self, msg: &ControlMessage) -> Result<()> {
        self.socket.send_to(&msg.to_bytes(), self.server_addr).await?;
        match msg {
            ControlMessage::Retr { sequences, .. } => {
                self.stats.retr_requests += 1;
                debug!("Sent request: {}", msg);
                info!("RETR {} segments", sequences.len());
            }
            _ => info!("Sent request: {}", msg),
        }
        Ok(())
    }

    async fn run_transfer(&mut self, name: &str) -> Result<FetchedFile> {
        let result = self.drive(name).await;
        if let Err(e) = &result {
            let phase = match e {
                Error::RetryBudgetExhausted { .. } | Error::NoResponse(_) => RequesterPhase::Exhausted,
                _ => RequesterPhase::Failed,
            };
            self.set_phase(phase);
        }
        result
    }

    /// 상태 머신 본체
    async fn drive(&mut self, name: &str) -> Result<FetchedFile> {
        let get = ControlMessage::Get { name: name.to_string() };
        let max_rounds = self.config.max_retry_rounds;
        let mut rounds = 0u32;

        self.set_phase(RequesterPhase::Requesting);
        self.send_control(&get).await?;
        self.set_phase(RequesterPhase::ReceivingInitial);
        self.receive_initial().await?;

        // 아무것도 받지 못했으면 GET 재전송도 라운드로 센다
        let mut total = loop {
            if let Some(total) = self.total_segments() {
                break total;
            }
            if rounds >= max_rounds {
                return Err(Error::NoResponse(format!(
                    "no segment received for '{}' after {} attempts",
                    name,
                    rounds + 1
                )));
            }
            rounds += 1;
            self.stats.retry_rounds = rounds;
            warn!("No response for '{}', re-sending GET (round {})", name, rounds);
            self.set_phase(RequesterPhase::Requesting);
            self.send_control(&get).await?;
            self.set_phase(RequesterPhase::ReceivingInitial);
            self.receive_initial().await?;
        };

        let mut outstanding = self.store.outstanding(total);
        info!(
            "GET finished: {}/{} segments, missing: {}",
            total as usize - outstanding.len(),
            total,
            preview(&outstanding)
        );

        while !outstanding.is_empty() {
            if rounds >= max_rounds {
                return Err(Error::RetryBudgetExhausted { rounds, outstanding });
            }
            rounds += 1;
            self.stats.retry_rounds = rounds;
            self.set_phase(RequesterPhase::Retrying { round: rounds });

            for batch in outstanding.chunks(self.config.retr_batch_size) {
                // 이전 배치 도중 도착했거나 total 이 줄어 범위를 벗어난 시퀀스는 제외
                let current = self.total_segments().unwrap_or(total);
                let pending: Vec<SequenceNumber> = batch
                    .iter()
                    .copied()
                    .filter(|&seq| in_range(seq, current) && !self.store.contains(seq))
                    .collect();
                if pending.is_empty() {
                    continue;
                }

                let retr = ControlMessage::Retr {
                    name: name.to_string(),
                    sequences: pending,
                };
                self.send_control(&retr).await?;
                if !self.receive_batch().await? {
                    // 응답이 전혀 없으면 남은 배치도 기다리지 않고 라운드 종료
                    warn!("RETR batch got no answer, ending round {}", rounds);
                    break;
                }
            }

            total = self.total_segments().unwrap_or(total);
            outstanding = self.store.outstanding(total);
            info!(
                "RETR round {} done. Still missing: {}",
                rounds,
                preview(&outstanding)
            );
        }

        let data = self.store.reassemble(total)?;
        let descriptor = self.transfer.as_ref().and_then(|t| t.descriptor.clone());
        if let Some(descriptor) = &descriptor {
            descriptor.verify(&data)?;
            debug!("'{}' verified ({} bytes)", name, descriptor.size);
        }

        self.set_phase(RequesterPhase::Complete);
        Ok(FetchedFile {
            name: name.to_string(),
            data,
            total_segments: total,
            descriptor,
            retry_rounds: rounds,
        })
    }

    fn transfer_complete(&self) -> bool {
        self.transfer
            .as_ref()
            .map(|t| t.is_complete(&self.store))
            .unwrap_or(false)
    }

    /// 최초 수신 단계
    ///
    /// 유휴 타임아웃까지 수신. 종료 마커 이후, 또는 세그먼트가 모두 모인 뒤에는
    /// 대기 창을 marker_grace 로 줄인다.
    ///
    /// 세그먼트가 total 개 모여도 곧바로 끝내지 않는다. 마커가 아직 없으면
    /// marker_grace 동안 더 기다려서 다이제스트를 받는다. 그 안에 마커가
    /// 오지 않으면 CRC 만으로 조립한다.
    async fn receive_initial(&mut self) -> Result<()> {
        let mut deadline = Instant::now() + self.config.idle_timeout();

        loop {
            let marker_seen = self.marker_seen();
            let complete = self.transfer_complete();
            if complete && marker_seen {
                break;
            }

            let Some(event) = self.receive_one(deadline, DropPhase::Initial).await? else {
                break;
            };

            match event {
                Event::Dropped | Event::Discarded => {}
                _ => {
                    let window = if self.marker_seen() || self.transfer_complete() {
                        self.config.marker_grace()
                    } else {
                        self.config.idle_timeout()
                    };
                    deadline = Instant::now() + window;
                }
            }
        }

        Ok(())
    }

    fn marker_seen(&self) -> bool {
        self.transfer.as_ref().map(|t| t.marker_seen).unwrap_or(false)
    }

    /// 재전송 배치 하나 수신: 배치 완료 마커 또는 타임아웃까지
    ///
    /// 서버에서 데이터그램을 하나라도 받았으면 true
    async fn receive_batch(&mut self) -> Result<bool> {
        let mut deadline = Instant::now() + self.config.batch_timeout();
        let mut answered = false;

        while !self.transfer_complete() {
            let Some(event) = self.receive_one(deadline, DropPhase::Retry).await? else {
                debug!("batch timeout");
                break;
            };
            answered = true;

            match event {
                Event::BatchComplete => break,
                Event::Dropped | Event::Discarded => {}
                _ => deadline = Instant::now() + self.config.batch_timeout(),
            }
        }

        Ok(answered || self.transfer_complete())
    }

    /// 데이터그램 하나 수신 및 처리. 마감이 지나면 None
    async fn receive_one(&mut self, deadline: Instant, phase: DropPhase) -> Result<Option<Event>> {
        loop {
            let (len, from) = match recv_until(&self.socket, &mut self.buf, deadline).await {
                Ok(Some(received)) => received,
                Ok(None) => return Ok(None),
                Err(e) if is_transient(&e) => {
                    debug!("수신 에러 (무시): {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if from != self.server_addr {
                debug!("Ignoring datagram from unexpected peer {}", from);
                continue;
            }

            // 송신측 페이로드 크기는 요청자 설정과 다를 수 있다
            let decoded = Segment::decode_bounded(&self.buf[..len], MAX_PAYLOAD_SIZE);
            return self.handle_frame(decoded, phase).map(Some);
        }
    }

    fn handle_frame(
        &mut self,
        decoded: std::result::Result<Segment, DecodeError>,
        phase: DropPhase,
    ) -> Result<Event> {
        let segment = match decoded {
            Ok(segment) => segment,
            Err(e) => {
                debug!("Discarding datagram: {}", e);
                self.stats.decode_errors += 1;
                return Ok(Event::Discarded);
            }
        };

        let Some(transfer) = self.transfer.as_mut() else {
            return Ok(Event::Discarded);
        };

        match segment.kind() {
            FrameKind::Error => {
                let msg = ErrorMessage::parse(&segment.payload);
                warn!("Server ERROR: {}", msg.to_text());
                Err(msg.into_error())
            }

            FrameKind::EndOfTransfer => {
                if transfer.drops.drop_marker() {
                    info!("(SIMULATED DROP) Dropping end-of-transfer marker");
                    self.stats.simulated_drops += 1;
                    return Ok(Event::Dropped);
                }
                if !segment.checksum_valid() {
                    warn!("End-of-transfer marker CRC MISMATCH, ignored");
                    self.stats.corrupted_segments += 1;
                    return Ok(Event::Corrupted);
                }

                let total = segment.total();
                if total > self.config.max_segments {
                    warn!(
                        "End-of-transfer marker total {} exceeds limit {}, ignored",
                        total, self.config.max_segments
                    );
                    self.stats.rejected_totals += 1;
                    return Ok(Event::Discarded);
                }
                match transfer.total {
                    Some(known) if known != total => {
                        warn!("Marker total {} overrides learned total {}", total, known);
                        self.store.truncate_to(total);
                    }
                    _ => {}
                }
                transfer.total = Some(total);
                transfer.marker_seen = true;
                transfer.descriptor = TransferDescriptor::from_marker(&transfer.name, total, &segment.payload);
                self.stats.total_segments = total as u64;
                info!("EOF packet received (total={})", total);
                Ok(Event::EndOfTransfer)
            }

            FrameKind::BatchComplete => {
                // 마커를 놓쳤으면 서버 캐시의 total 로 학습값을 바로잡는다
                let total = segment.total();
                let mismatch = transfer.total.map(|known| known != total).unwrap_or(false);
                if mismatch && !transfer.marker_seen && total <= self.config.max_segments {
                    warn!("Batch marker total {} overrides learned total {:?}", total, transfer.total);
                    self.store.truncate_to(total);
                    transfer.total = Some(total);
                    self.stats.total_segments = total as u64;
                }
                debug!("Batch-complete marker received");
                Ok(Event::BatchComplete)
            }

            FrameKind::Data => {
                let sequence = segment.sequence();

                if transfer.drops.drop_segment(phase, sequence) {
                    info!("(SIMULATED DROP) Dropping seq {}", sequence);
                    self.stats.simulated_drops += 1;
                    return Ok(Event::Dropped);
                }

                // 손상된 프레임의 헤더는 믿지 않는다 (total 학습 전에 검사)
                if let Err(e) = segment.verify() {
                    warn!("Segment {} CRC MISMATCH: {}", sequence, e);
                    if let Some(total) = transfer.total {
                        if in_range(sequence, total) {
                            self.store.mark_invalid(sequence);
                        }
                    }
                    self.stats.corrupted_segments += 1;
                    return Ok(Event::Corrupted);
                }

                if segment.total() > self.config.max_segments {
                    warn!(
                        "Discarding seq {} with total {} over limit {}",
                        sequence,
                        segment.total(),
                        self.config.max_segments
                    );
                    self.stats.rejected_totals += 1;
                    return Ok(Event::Discarded);
                }

                // 자기 헤더의 total 에도 맞지 않는 프레임 (total 0 포함)
                if !in_range(sequence, segment.total()) {
                    debug!("Discarding out-of-range seq {} (total={})", sequence, segment.total());
                    return Ok(Event::Discarded);
                }

                match transfer.total {
                    Some(total) if total != segment.total() => {
                        debug!(
                            "Discarding seq {} with foreign total {} (expected {})",
                            sequence,
                            segment.total(),
                            total
                        );
                        return Ok(Event::Discarded);
                    }
                    Some(_) => {}
                    None => {
                        transfer.total = Some(segment.total());
                        self.stats.total_segments = segment.total() as u64;
                    }
                }

                let len = segment.payload.len();
                if self.store.insert(sequence, segment.payload) {
                    debug!("Segment {} received OK", sequence);
                    self.stats.received_segments += 1;
                    self.stats.total_bytes += len as u64;
                    Ok(Event::Stored)
                } else {
                    self.stats.duplicate_segments += 1;
                    Ok(Event::Duplicate)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_plan_first_receipt_only() {
        let plan = DropPlan::initial([3, 7]).with_retry([7]);
        let mut sim = DropSimulator::new(&plan);

        assert!(sim.drop_segment(DropPhase::Initial, 3));
        assert!(!sim.drop_segment(DropPhase::Initial, 3));
        assert!(!sim.drop_segment(DropPhase::Initial, 4));
        assert!(sim.drop_segment(DropPhase::Initial, 7));

        assert!(!sim.drop_segment(DropPhase::Retry, 3));
        assert!(sim.drop_segment(DropPhase::Retry, 7));
        assert!(!sim.drop_segment(DropPhase::Retry, 7));
        assert!(!sim.drop_marker());
    }

    #[test]
    fn test_drop_plan_phases_are_independent() {
        let plan = DropPlan::none().with_random_loss(1.0, 0.0, 42);
        let mut sim = DropSimulator::new(&plan);
        assert!((1..=20).all(|seq| sim.drop_segment(DropPhase::Initial, seq)));
        assert!((1..=20).all(|seq| !sim.drop_segment(DropPhase::Retry, seq)));
    }

    #[test]
    fn test_random_loss_is_seeded() {
        let plan = DropPlan::none().with_random_loss(0.5, 0.5, 7);
        let mut a = DropSimulator::new(&plan);
        let mut b = DropSimulator::new(&plan);
        let pattern_a: Vec<bool> = (1..=64).map(|s| a.drop_segment(DropPhase::Initial, s)).collect();
        let pattern_b: Vec<bool> = (1..=64).map(|s| b.drop_segment(DropPhase::Initial, s)).collect();
        assert_eq!(pattern_a, pattern_b);
        assert!(pattern_a.iter().any(|d| *d));
        assert!(pattern_a.iter().any(|d| !*d));
    }

    #[test]
    fn test_preview_truncates_long_lists() {
        assert_eq!(preview(&[3, 7]), "3,7");
        let long: Vec<u32> = (1..=100).collect();
        let shown = preview(&long);
        assert!(shown.starts_with("1,2,3,"));
        assert!(shown.ends_with(",32,... (100 total)"));
    }

    #[test]
    fn test_plan_is_empty() {
        assert!(DropPlan::none().is_empty());
        assert!(!DropPlan::initial([1]).is_empty());
        assert!(!DropPlan::none().with_end_marker_dropped().is_empty());
    }

    #[tokio::test]
    async fn test_handle_frame_classifies_datagrams() {
        let server: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut requester = Requester::connect(Config::default(), "127.0.0.1:0".parse().unwrap(), server)
            .await
            .unwrap();
        requester.transfer = Some(Transfer::new("f.bin", &DropPlan::initial([2])));

        let frame = |seq: u32, total: u32, payload: &'static [u8]| {
            Segment::from_bytes(&Segment::data(seq, total, Bytes::from_static(payload)).to_bytes())
        };

        assert_eq!(requester.handle_frame(frame(1, 3, b"a"), DropPhase::Initial).unwrap(), Event::Stored);
        assert_eq!(requester.total_segments(), Some(3));
        assert_eq!(requester.handle_frame(frame(1, 3, b"a"), DropPhase::Initial).unwrap(), Event::Duplicate);
        assert_eq!(requester.handle_frame(frame(2, 3, b"b"), DropPhase::Initial).unwrap(), Event::Dropped);
        assert_eq!(requester.handle_frame(frame(4, 3, b"d"), DropPhase::Initial).unwrap(), Event::Discarded);
        assert_eq!(requester.handle_frame(frame(3, 9, b"c"), DropPhase::Initial).unwrap(), Event::Discarded);

        let mut corrupted = Segment::data(3, 3, Bytes::from_static(b"c"));
        corrupted.payload = Bytes::from_static(b"x");
        assert_eq!(requester.handle_frame(Ok(corrupted), DropPhase::Initial).unwrap(), Event::Corrupted);
        assert_eq!(requester.outstanding(), Some(vec![2, 3]));
        assert!(requester.store.is_invalid(3));

        let malformed = Segment::from_bytes(&[0u8; 4]);
        assert_eq!(requester.handle_frame(malformed, DropPhase::Initial).unwrap(), Event::Discarded);
        assert_eq!(requester.stats().decode_errors, 1);

        let err = Segment::from_bytes(&Segment::error("ERR NO_ACTIVE_TRANSFER gone").to_bytes());
        assert!(matches!(
            requester.handle_frame(err, DropPhase::Retry),
            Err(Error::NoActiveTransfer(_))
        ));
    }

    #[tokio::test]
    async fn test_untrusted_totals_are_not_learned() {
        let server: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let config = Config {
            max_segments: 1000,
            ..Config::default()
        };
        let mut requester = Requester::connect(config, "127.0.0.1:0".parse().unwrap(), server)
            .await
            .unwrap();
        requester.transfer = Some(Transfer::new("f.bin", &DropPlan::none()));

        // 손상된 프레임의 total 은 학습하지 않음
        let mut corrupted = Segment::data(1, 50, Bytes::from_static(b"a"));
        corrupted.payload = Bytes::from_static(b"b");
        assert_eq!(requester.handle_frame(Ok(corrupted), DropPhase::Initial).unwrap(), Event::Corrupted);
        assert_eq!(requester.total_segments(), None);
        assert_eq!(requester.store.invalid_count(), 0);

        // 한도 초과 total
        let huge = Segment::data(1, u32::MAX, Bytes::from_static(b"hello"));
        assert_eq!(requester.handle_frame(Ok(huge), DropPhase::Initial).unwrap(), Event::Discarded);
        let marker = Segment::end_of_transfer(1001, Bytes::new());
        assert_eq!(requester.handle_frame(Ok(marker), DropPhase::Initial).unwrap(), Event::Discarded);
        assert_eq!(requester.stats().rejected_totals, 2);

        // total 0 인 데이터 프레임은 존재할 수 없음
        let empty = Segment::data(1, 0, Bytes::from_static(b"x"));
        assert_eq!(requester.handle_frame(Ok(empty), DropPhase::Initial).unwrap(), Event::Discarded);
        assert_eq!(requester.total_segments(), None);

        let ok = Segment::data(2, 3, Bytes::from_static(b"b"));
        assert_eq!(requester.handle_frame(Ok(ok), DropPhase::Initial).unwrap(), Event::Stored);
        assert_eq!(requester.total_segments(), Some(3));

        // 마커를 놓친 상태에서 배치 완료 마커의 total 이 학습값을 바로잡음
        let batch = Segment::batch_complete(2);
        assert_eq!(requester.handle_frame(Ok(batch), DropPhase::Retry).unwrap(), Event::BatchComplete);
        assert_eq!(requester.total_segments(), Some(2));
        assert_eq!(requester.outstanding(), Some(vec![1]));
    }
}
