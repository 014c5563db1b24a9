//! 세그먼트 와이어 코덱
//!
//! 모든 데이터그램(서버 → 클라이언트)은 고정 15바이트 헤더 + 페이로드.
//! 정수는 모두 네트워크 바이트 순서(big-endian).
//!
//! ```text
//! +----------+----------+-------------+----------+------+-----------
//! | sequence |  total   | payload_len | checksum | kind | payload...
//! |  u32     |  u32     |    u16      |   u32    |  u8  |
//! +----------+----------+-------------+----------+------+-----------
//! ```
//!
//! - checksum: 페이로드만 대상으로 한 CRC-32 (헤더 제외)
//! - kind: 0=데이터, 1=전송 종료, 2=에러, 3=배치 완료

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{Error, Result, HEADER_SIZE};

/// 시퀀스 번호 (1부터 시작)
pub type SequenceNumber = u32;

/// 프레임 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// 파일 데이터
    Data = 0,

    /// 최초 전송 종료 마커
    EndOfTransfer = 1,

    /// 에러 (페이로드에 `ERR <TAG> <사유>`)
    Error = 2,

    /// 재전송 배치 완료 마커
    BatchComplete = 3,
}

impl FrameKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FrameKind::Data),
            1 => Some(FrameKind::EndOfTransfer),
            2 => Some(FrameKind::Error),
            3 => Some(FrameKind::BatchComplete),
            _ => None,
        }
    }
}

/// 디코드 실패 사유
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("헤더 손상: {len} bytes")]
    MalformedHeader { len: usize },

    #[error("알 수 없는 프레임 종류: {0}")]
    UnknownKind(u8),

    #[error("페이로드 잘림: declared {declared}, available {available}")]
    TruncatedPayload { declared: usize, available: usize },

    #[error("페이로드 크기 초과: {len} > {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// 세그먼트 헤더
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    /// 시퀀스 번호 (제어 프레임은 0)
    pub sequence: SequenceNumber,

    /// 전송 전체 세그먼트 수
    pub total: u32,

    /// 페이로드 길이
    pub payload_len: u16,

    /// 페이로드 CRC-32
    pub checksum: u32,

    /// 프레임 종류
    pub kind: FrameKind,
}

/// 세그먼트 (송신 데이터그램 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub payload: Bytes,
}

impl Segment {
    /// 새 프레임 생성 (체크섬 계산 포함)
    pub fn new(kind: FrameKind, sequence: SequenceNumber, total: u32, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= u16::MAX as usize);
        Self {
            header: SegmentHeader {
                sequence,
                total,
                payload_len: payload.len() as u16,
                checksum: crc32fast::hash(&payload),
                kind,
            },
            payload,
        }
    }

    /// 데이터 세그먼트
    pub fn data(sequence: SequenceNumber, total: u32, payload: Bytes) -> Self {
        Self::new(FrameKind::Data, sequence, total, payload)
    }

    /// 전송 종료 마커 (페이로드: 전송 디스크립터)
    pub fn end_of_transfer(total: u32, descriptor: Bytes) -> Self {
        Self::new(FrameKind::EndOfTransfer, 0, total, descriptor)
    }

    /// 배치 완료 마커
    pub fn batch_complete(total: u32) -> Self {
        Self::new(FrameKind::BatchComplete, 0, total, Bytes::new())
    }

    /// 에러 프레임
    pub fn error(text: &str) -> Self {
        Self::new(FrameKind::Error, 0, 0, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn kind(&self) -> FrameKind {
        self.header.kind
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.header.sequence
    }

    pub fn total(&self) -> u32 {
        self.header.total
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.header.sequence);
        buf.put_u32(self.header.total);
        buf.put_u16(self.header.payload_len);
        buf.put_u32(self.header.checksum);
        buf.put_u8(self.header.kind as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// 바이트에서 역직렬화
    ///
    /// 체크섬 불일치는 여기서 거부하지 않는다. 호출자가 [`Segment::checksum_valid`]로
    /// 판단해서 해당 시퀀스를 "수신했지만 손상됨"으로 기록해야 하기 때문.
    /// 선언된 길이 뒤의 바이트는 무시한다.
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::MalformedHeader { len: bytes.len() });
        }

        let mut header = &bytes[..HEADER_SIZE];
        let sequence = header.get_u32();
        let total = header.get_u32();
        let payload_len = header.get_u16();
        let checksum = header.get_u32();
        let kind_tag = header.get_u8();

        let kind = FrameKind::from_u8(kind_tag).ok_or(DecodeError::UnknownKind(kind_tag))?;

        let available = bytes.len() - HEADER_SIZE;
        if payload_len as usize > available {
            return Err(DecodeError::TruncatedPayload {
                declared: payload_len as usize,
                available,
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[HEADER_SIZE..HEADER_SIZE + payload_len as usize]);

        Ok(Self {
            header: SegmentHeader {
                sequence,
                total,
                payload_len,
                checksum,
                kind,
            },
            payload,
        })
    }

    /// 페이로드 크기 상한을 함께 검사하는 역직렬화
    pub fn decode_bounded(bytes: &[u8], max_payload: usize) -> std::result::Result<Self, DecodeError> {
        let segment = Self::from_bytes(bytes)?;
        if segment.payload.len() > max_payload {
            return Err(DecodeError::PayloadTooLarge {
                len: segment.payload.len(),
                max: max_payload,
            });
        }
        Ok(segment)
    }

    /// CRC 검증
    pub fn checksum_valid(&self) -> bool {
        crc32fast::hash(&self.payload) == self.header.checksum
    }

    /// CRC 검증 (에러 반환)
    pub fn verify(&self) -> Result<()> {
        let got = crc32fast::hash(&self.payload);
        if got != self.header.checksum {
            return Err(Error::ChecksumMismatch {
                sequence: self.header.sequence,
                expected: self.header.checksum,
                got,
            });
        }
        Ok(())
    }
}

/// 데이터 세그먼트 인코딩
pub fn encode(sequence: SequenceNumber, total: u32, payload: &[u8]) -> Bytes {
    Segment::data(sequence, total, Bytes::copy_from_slice(payload)).to_bytes()
}

/// 세그먼트 디코딩
pub fn decode(bytes: &[u8]) -> std::result::Result<Segment, DecodeError> {
    Segment::from_bytes(bytes)
}

/// 전송 디스크립터 (전송 종료 마커의 페이로드)
///
/// 페이로드 형식: file_size(u64) [+ blake3 digest(32)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    /// 파일 이름
    pub name: String,

    /// 파일 크기 (바이트)
    pub size: u64,

    /// 전체 세그먼트 수
    pub total_segments: u32,

    /// 전체 파일 BLAKE3 다이제스트
    pub digest: Option<[u8; 32]>,
}

impl TransferDescriptor {
    pub fn new(name: &str, data: &[u8], payload_size: usize, with_digest: bool) -> Self {
        Self {
            name: name.to_string(),
            size: data.len() as u64,
            total_segments: crate::segmenter::total_segments(data.len() as u64, payload_size),
            digest: with_digest.then(|| *blake3::hash(data).as_bytes()),
        }
    }

    /// 마커 페이로드로 직렬화
    pub fn marker_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + 32);
        buf.put_u64(self.size);
        if let Some(digest) = &self.digest {
            buf.put_slice(digest);
        }
        buf.freeze()
    }

    /// 마커 페이로드에서 역직렬화
    ///
    /// 빈 페이로드나 알 수 없는 길이는 디스크립터 없음(None)으로 취급
    pub fn from_marker(name: &str, total_segments: u32, payload: &[u8]) -> Option<Self> {
        let mut buf = payload;
        let digest = match payload.len() {
            8 => None,
            40 => {
                let mut digest = [0u8; 32];
                digest.copy_from_slice(&payload[8..40]);
                Some(digest)
            }
            _ => return None,
        };
        let size = buf.get_u64();

        Some(Self {
            name: name.to_string(),
            size,
            total_segments,
            digest,
        })
    }

    /// 조립된 데이터 검증
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        if data.len() as u64 != self.size {
            return Err(Error::IntegrityFailure(format!(
                "{}: size mismatch, expected {} bytes, got {}",
                self.name,
                self.size,
                data.len()
            )));
        }

        if let Some(expected) = &self.digest {
            let actual = blake3::hash(data);
            if actual.as_bytes() != expected {
                return Err(Error::IntegrityFailure(format!(
                    "{}: blake3 digest mismatch",
                    self.name
                )));
            }
        }

        Ok(())
    }
}
