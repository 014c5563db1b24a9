//! # SRFT (Selective Repeat File Transfer)
//!
//! UDP 기반 선택적 재전송 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **고정 헤더**: sequence / total / payload_len / CRC-32 / kind (15바이트, big-endian)
//! - **선택적 재전송**: 누락·손상된 시퀀스만 `RETR`로 요청
//! - **순서 무관**: 재정렬·손실을 전제로 희소 저장소에서 조립
//! - **이중 무결성**: 세그먼트별 CRC-32 + 파일 전체 BLAKE3
//! - **요청자별 캐시**: 서버는 (주소, 파일) 쌍마다 세그먼트 목록을 보관

pub mod config;
pub mod error;
pub mod message;
pub mod provider;
pub mod requester;
pub mod segment;
pub mod segmenter;
pub mod stats;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use message::{ControlMessage, ErrorMessage, ErrorReason};
pub use provider::{Provider, SegmentCache, SessionState};
pub use requester::{DropPlan, FetchedFile, Requester, RequesterPhase};
pub use segment::{decode, encode, DecodeError, FrameKind, Segment, SequenceNumber, TransferDescriptor};
pub use segmenter::{in_range, sequence_range, total_segments, SegmentStore, Segmenter};
pub use stats::TransferStats;

/// 헤더 크기 (바이트): seq(4) + total(4) + payload_len(2) + crc32(4) + kind(1)
pub const HEADER_SIZE: usize = 15;

/// 기본 페이로드 크기 (바이트)
pub const DEFAULT_PAYLOAD_SIZE: usize = 1024;

/// 최대 페이로드 크기: UDP 최대 페이로드(65507) - 헤더
pub const MAX_PAYLOAD_SIZE: usize = 65507 - HEADER_SIZE;

/// 첫 시퀀스 번호
pub const FIRST_SEQUENCE: u32 = 1;
