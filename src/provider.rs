//! 제공자 (서버측)
//!
//! - GET: 파일 전체를 세그먼트로 분할해 한 번 전송, 캐시에 보관
//! - RETR: 캐시에서 지정 세그먼트만 재전송
//! - 요청마다 독립 태스크 (JoinSet 으로 관리)
//!
//! (요청자 주소, 파일 이름) 쌍마다 상태: `Idle -> Serving -> Cached`

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::message::{ControlMessage, ErrorMessage, ErrorReason};
use crate::segment::{Segment, SequenceNumber, TransferDescriptor};
use crate::segmenter::Segmenter;
use crate::stats::TransferStats;
use crate::transport::{is_transient, pace};
use crate::{Config, Error, Result, FIRST_SEQUENCE};

/// 캐시 키: (요청자 주소, 파일 이름)
pub type SessionKey = (SocketAddr, String);

/// 요청자-파일 쌍의 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 캐시 없음
    Idle,

    /// 최초 전송 중
    Serving,

    /// 최초 전송 완료, 재전송 대기
    Cached,
}

/// 캐시 항목
#[derive(Debug)]
struct CacheEntry {
    /// 인코딩된 데이터 프레임 (인덱스 i = 시퀀스 i+1)
    frames: Arc<Vec<Bytes>>,

    descriptor: TransferDescriptor,

    state: SessionState,

    /// 마지막 접근 시간 (유휴 만료 기준)
    last_access: Instant,
}

/// 세그먼트 캐시
///
/// DashMap 샤드 락으로 삽입(GET)과 조회(RETR)를 직렬화한다.
#[derive(Debug, Default)]
pub struct SegmentCache {
    entries: DashMap<SessionKey, CacheEntry>,
}

impl SegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 삽입 (기존 항목 교체), 상태는 Serving
    pub fn insert(&self, key: SessionKey, descriptor: TransferDescriptor, frames: Arc<Vec<Bytes>>) {
        let replaced = self.entries.insert(
            key,
            CacheEntry {
                frames,
                descriptor,
                state: SessionState::Serving,
                last_access: Instant::now(),
            },
        );
        if replaced.is_some() {
            debug!("캐시 항목 교체");
        }
    }

    /// 재전송용 조회: (프레임, 전체 세그먼트 수)
    pub fn lookup(&self, key: &SessionKey) -> Option<(Arc<Vec<Bytes>>, u32)> {
        let mut entry = self.entries.get_mut(key)?;
        entry.last_access = Instant::now();
        Some((entry.frames.clone(), entry.descriptor.total_segments))
    }

    pub fn set_state(&self, key: &SessionKey, state: SessionState) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.state = state;
            entry.last_access = Instant::now();
        }
    }

    /// 세션 상태 (항목 없으면 Idle)
    pub fn state(&self, addr: SocketAddr, name: &str) -> SessionState {
        self.entries
            .get(&(addr, name.to_string()))
            .map(|entry| entry.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn descriptor(&self, addr: SocketAddr, name: &str) -> Option<TransferDescriptor> {
        self.entries
            .get(&(addr, name.to_string()))
            .map(|entry| entry.descriptor.clone())
    }

    pub fn remove(&self, key: &SessionKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// 유휴 만료된 Cached 항목 제거, 제거 수 반환
    pub fn evict_idle(&self, ttl: std::time::Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let expired = entry.state == SessionState::Cached && entry.last_access.elapsed() > ttl;
            if expired {
                debug!("캐시 만료: {} '{}'", key.0, key.1);
            }
            !expired
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// 요청 이름을 제공 디렉터리 안의 경로로 변환
///
/// 단일 일반 경로 요소만 허용 (`..`, 절대 경로, 하위 디렉터리 거부)
pub fn resolve_path(root: &Path, name: &str) -> Result<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(file)), None) if !name.contains('\\') => Ok(root.join(file)),
        _ => Err(Error::InvalidFileName(name.to_string())),
    }
}

/// 태스크 간 공유 상태
struct Shared {
    config: Config,
    root: PathBuf,
    socket: Arc<UdpSocket>,
    cache: SegmentCache,
    segmenter: Segmenter,
    stats: RwLock<TransferStats>,
}

/// 태스크 종료 보고
struct TaskDone {
    /// GET 세션이면 (키, 세대)
    session: Option<(SessionKey, u64)>,
}

/// 진행 중인 GET 세션 핸들
struct SessionHandle {
    generation: u64,
    abort: AbortHandle,
}

/// 실행 루프 로컬 상태
struct Supervisor {
    tasks: JoinSet<TaskDone>,
    sessions: HashMap<SessionKey, SessionHandle>,
    next_generation: u64,
}

impl Supervisor {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            sessions: HashMap::new(),
            next_generation: 0,
        }
    }

    /// 진행 중인 세션 중단
    fn cancel(&mut self, key: &SessionKey) -> bool {
        match self.sessions.remove(key) {
            Some(handle) => {
                handle.abort.abort();
                true
            }
            None => false,
        }
    }

    fn reap(&mut self, done: TaskDone) {
        if let Some((key, generation)) = done.session {
            let current = self
                .sessions
                .get(&key)
                .map(|handle| handle.generation == generation)
                .unwrap_or(false);
            if current {
                self.sessions.remove(&key);
            }
        }
    }
}

/// 제공자
pub struct Provider {
    shared: Arc<Shared>,

    local_addr: SocketAddr,

    /// 실행 중 플래그
    running: AtomicBool,

    shutdown: Notify,
}

impl Provider {
    /// 소켓 바인딩
    pub async fn bind(config: Config, bind_addr: SocketAddr, root: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let local_addr = socket.local_addr()?;

        Ok(Self {
            shared: Arc::new(Shared {
                segmenter: Segmenter::new(config.payload_size),
                config,
                root: root.into(),
                socket,
                cache: SegmentCache::new(),
                stats: RwLock::new(TransferStats::new()),
            }),
            local_addr,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn cache(&self) -> &SegmentCache {
        &self.shared.cache
    }

    /// 통계 반환
    pub fn get_stats(&self) -> TransferStats {
        self.shared.stats.read().clone()
    }

    /// 정지
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// 서버 실행 (stop 호출 시까지)
    pub async fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        info!(
            "SRFT provider listening on {}, serving dir: {}",
            self.local_addr,
            self.shared.root.display()
        );

        let mut supervisor = Supervisor::new();
        let mut sweep = tokio::time::interval(self.shared.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buf = vec![0u8; self.shared.config.recv_buffer_size];

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                result = self.shared.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => self.dispatch(&buf[..len], addr, &mut supervisor).await,
                        Err(e) if is_transient(&e) => debug!("수신 에러 (무시): {}", e),
                        Err(e) => warn!("수신 에러: {}", e),
                    }
                }
                Some(joined) = supervisor.tasks.join_next(), if !supervisor.tasks.is_empty() => {
                    match joined {
                        Ok(done) => supervisor.reap(done),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => warn!("전송 태스크 실패: {}", e),
                    }
                }
                _ = sweep.tick() => {
                    let evicted = self.shared.cache.evict_idle(self.shared.config.cache_ttl());
                    if evicted > 0 {
                        debug!("유휴 캐시 {}개 제거", evicted);
                    }
                }
                _ = self.shutdown.notified() => {}
            }
        }

        supervisor.tasks.shutdown().await;
        supervisor.sessions.clear();
        self.shared.cache.clear();
        info!("SRFT provider stopped: {}", self.get_stats().summary());

        Ok(())
    }

    /// 명령 처리
    async fn dispatch(&self, data: &[u8], addr: SocketAddr, supervisor: &mut Supervisor) {
        let msg = match ControlMessage::parse(data) {
            Ok(msg) => msg,
            Err(reason) => {
                warn!(
                    "잘못된 요청 from {}: {:?} ({})",
                    addr,
                    String::from_utf8_lossy(data),
                    reason
                );
                self.shared.send_error(addr, ErrorMessage::from_reason(reason)).await;
                return;
            }
        };

        debug!("Received from {}: {}", addr, msg);

        match msg {
            ControlMessage::Get { name } => {
                let key: SessionKey = (addr, name.clone());

                // 같은 쌍의 이전 세션 대체
                if supervisor.cancel(&key) {
                    debug!("이전 세션 중단: {} '{}'", addr, name);
                }
                self.shared.cache.remove(&key);

                supervisor.next_generation += 1;
                let generation = supervisor.next_generation;

                let shared = self.shared.clone();
                let session = Some((key.clone(), generation));
                let abort = supervisor.tasks.spawn(async move {
                    shared.serve_file(addr, name).await;
                    TaskDone { session }
                });
                supervisor.sessions.insert(key, SessionHandle { generation, abort });
            }

            ControlMessage::Retr { name, sequences } => {
                let key: SessionKey = (addr, name);
                match self.shared.cache.lookup(&key) {
                    Some((frames, total)) => {
                        let shared = self.shared.clone();
                        supervisor.tasks.spawn(async move {
                            shared.resend(addr, &key.1, &frames, total, &sequences).await;
                            TaskDone { session: None }
                        });
                    }
                    None => {
                        warn!("RETR without active transfer: {} '{}'", addr, key.1);
                        self.shared
                            .send_error(addr, ErrorMessage::from_reason(ErrorReason::NoActiveTransfer))
                            .await;
                    }
                }
            }

            ControlMessage::Done { name } => {
                let key: SessionKey = (addr, name);
                let cancelled = supervisor.cancel(&key);
                let removed = self.shared.cache.remove(&key);
                info!(
                    "Session closed: {} '{}' (cancelled={}, evicted={})",
                    addr, key.1, cancelled, removed
                );
            }
        }
    }
}

impl Shared {
    /// 에러 프레임 전송
    async fn send_error(&self, addr: SocketAddr, msg: ErrorMessage) {
        let frame = Segment::error(&msg.to_text()).to_bytes();
        match self.socket.send_to(&frame, addr).await {
            Ok(_) => info!("Sent ERROR to {}: {}", addr, msg.to_text()),
            Err(e) => warn!("에러 프레임 전송 실패 to {}: {}", addr, e),
        }
    }

    /// GET 처리: 분할, 캐시, 전체 전송, 종료 마커
    async fn serve_file(&self, addr: SocketAddr, name: String) {
        let path = match resolve_path(&self.root, &name) {
            Ok(path) => path,
            Err(e) => {
                warn!("{}", e);
                self.send_error(
                    addr,
                    ErrorMessage::new(ErrorReason::MalformedRequest, format!("Invalid file name: {}", name)),
                )
                .await;
                return;
            }
        };

        let data = match tokio::fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!("파일 읽기 실패 {}: {}", path.display(), e);
                self.send_error(
                    addr,
                    ErrorMessage::new(ErrorReason::FileNotFound, format!("File not found: {}", name)),
                )
                .await;
                return;
            }
        };

        // 분할 + CRC + 다이제스트 계산은 블로킹 풀에서
        let segmenter = self.segmenter.clone();
        let with_digest = self.config.send_digest;
        let file_name = name.clone();
        let built = tokio::task::spawn_blocking(move || {
            let descriptor =
                TransferDescriptor::new(&file_name, &data, segmenter.payload_size(), with_digest);
            let frames = segmenter.encode_frames(&data);
            (descriptor, frames)
        })
        .await;

        let (descriptor, frames) = match built {
            Ok(built) => built,
            Err(e) => {
                warn!("세그먼트 생성 실패 '{}': {}", name, e);
                return;
            }
        };

        let key: SessionKey = (addr, name.clone());
        let total = descriptor.total_segments;
        let frames = Arc::new(frames);
        let marker = Segment::end_of_transfer(total, descriptor.marker_payload()).to_bytes();

        info!(
            "Sending '{}' ({} bytes) in {} segments to {}",
            name, descriptor.size, total, addr
        );
        {
            let mut stats = self.stats.write();
            stats.total_transfers += 1;
            stats.total_segments += total as u64;
        }
        self.cache.insert(key.clone(), descriptor, frames.clone());

        let interval = self.config.send_interval();
        for frame in frames.iter() {
            if let Err(e) = self.socket.send_to(frame, addr).await {
                warn!("세그먼트 전송 실패 to {}: {}", addr, e);
            } else {
                let mut stats = self.stats.write();
                stats.segments_sent += 1;
                stats.total_bytes += frame.len() as u64;
            }
            pace(interval).await;
        }

        self.cache.set_state(&key, SessionState::Cached);
        if let Err(e) = self.socket.send_to(&marker, addr).await {
            warn!("종료 마커 전송 실패 to {}: {}", addr, e);
        }

        info!("Finished sending '{}' to {} (EOF, total={})", name, addr, total);
    }

    /// RETR 처리: 범위 안의 지정 세그먼트 재전송 후 배치 완료 마커
    async fn resend(
        &self,
        addr: SocketAddr,
        name: &str,
        frames: &[Bytes],
        total: u32,
        sequences: &[SequenceNumber],
    ) {
        debug!("RETR '{}' seqs={:?} to {}", name, sequences, addr);

        let interval = self.config.send_interval();
        let mut resent = 0usize;
        for &sequence in sequences {
            let frame = sequence
                .checked_sub(FIRST_SEQUENCE)
                .and_then(|idx| frames.get(idx as usize));

            let Some(frame) = frame else {
                debug!("Ignoring invalid seq {} (total={})", sequence, total);
                self.stats.write().out_of_range_requests += 1;
                continue;
            };

            if let Err(e) = self.socket.send_to(frame, addr).await {
                warn!("재전송 실패 seq={} to {}: {}", sequence, addr, e);
                continue;
            }
            resent += 1;
            {
                let mut stats = self.stats.write();
                stats.retransmitted_segments += 1;
                stats.total_bytes += frame.len() as u64;
            }
            pace(interval).await;
        }

        let marker = Segment::batch_complete(total).to_bytes();
        if let Err(e) = self.socket.send_to(&marker, addr).await {
            warn!("배치 완료 마커 전송 실패 to {}: {}", addr, e);
        }
        self.stats.write().retr_requests += 1;

        info!(
            "Finished RETR batch for '{}' to {} ({}/{} resent)",
            name,
            addr,
            resent,
            sequences.len()
        );
    }
}
