//! 파일 분할과 조립
//!
//! - Segmenter: 파일 바이트를 고정 크기 페이로드로 분할 (송신측)
//! - SegmentStore: 수신된 세그먼트 보관, 누락 집합 계산, 조립 (수신측)
//!
//! 시퀀스 번호는 1부터 시작해서 연속으로 증가한다.

use std::collections::{BTreeMap, BTreeSet};

use bytes::{Bytes, BytesMut};
use rayon::prelude::*;

use crate::segment::{Segment, SequenceNumber};
use crate::{Error, Result, FIRST_SEQUENCE};

/// 전체 세그먼트 수 = ceil(file_size / payload_size)
pub fn total_segments(file_size: u64, payload_size: usize) -> u32 {
    let payload_size = payload_size.max(1) as u64;
    ((file_size + payload_size - 1) / payload_size) as u32
}

/// total 개 세그먼트의 시퀀스 범위 `[FIRST_SEQUENCE, FIRST_SEQUENCE + total)`
///
/// total 이 u32::MAX 여도 넘치지 않는다.
pub fn sequence_range(total: u32) -> impl DoubleEndedIterator<Item = SequenceNumber> {
    (0..total).map(|idx| FIRST_SEQUENCE + idx)
}

/// 시퀀스가 total 범위 안인지
pub fn in_range(sequence: SequenceNumber, total: u32) -> bool {
    sequence
        .checked_sub(FIRST_SEQUENCE)
        .map(|idx| idx < total)
        .unwrap_or(false)
}

/// 세그먼트 생성기 (송신측)
#[derive(Debug, Clone)]
pub struct Segmenter {
    payload_size: usize,
}

impl Segmenter {
    pub fn new(payload_size: usize) -> Self {
        Self {
            payload_size: payload_size.max(1),
        }
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// 데이터를 (시퀀스, 페이로드) 목록으로 분할
    pub fn split(&self, data: &Bytes) -> Vec<(SequenceNumber, Bytes)> {
        (0..data.len())
            .step_by(self.payload_size)
            .enumerate()
            .map(|(idx, offset)| {
                let end = (offset + self.payload_size).min(data.len());
                (FIRST_SEQUENCE + idx as u32, data.slice(offset..end))
            })
            .collect()
    }

    /// 모든 데이터 세그먼트를 와이어 프레임으로 인코딩
    ///
    /// 결과 인덱스 i 는 시퀀스 `FIRST_SEQUENCE + i`. CRC 계산은 병렬 처리.
    pub fn encode_frames(&self, data: &Bytes) -> Vec<Bytes> {
        let total = total_segments(data.len() as u64, self.payload_size);
        self.split(data)
            .into_par_iter()
            .map(|(sequence, payload)| Segment::data(sequence, total, payload).to_bytes())
            .collect()
    }
}

/// 세그먼트 저장소 (수신측)
///
/// 체크섬이 맞는 세그먼트만 `payloads`에 들어간다. 손상된 세그먼트는
/// `invalid`에만 기록되어 누락 집합에 남는다.
#[derive(Debug, Default)]
pub struct SegmentStore {
    payloads: BTreeMap<SequenceNumber, Bytes>,
    invalid: BTreeSet<SequenceNumber>,
    duplicates: u64,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 유효 세그먼트 삽입. 이미 있으면 false
    pub fn insert(&mut self, sequence: SequenceNumber, payload: Bytes) -> bool {
        self.invalid.remove(&sequence);
        if self.payloads.contains_key(&sequence) {
            self.duplicates += 1;
            return false;
        }
        self.payloads.insert(sequence, payload);
        true
    }

    /// "수신했지만 체크섬 실패" 기록
    ///
    /// 이미 유효한 사본이 있으면 무시
    pub fn mark_invalid(&mut self, sequence: SequenceNumber) {
        if !self.payloads.contains_key(&sequence) {
            self.invalid.insert(sequence);
        }
    }

    pub fn contains(&self, sequence: SequenceNumber) -> bool {
        self.payloads.contains_key(&sequence)
    }

    pub fn is_invalid(&self, sequence: SequenceNumber) -> bool {
        self.invalid.contains(&sequence)
    }

    /// 유효 세그먼트 수
    pub fn valid_count(&self) -> usize {
        self.payloads.len()
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// total 범위를 벗어난 항목 제거 (권위 있는 total 수신 시)
    pub fn truncate_to(&mut self, total: u32) {
        self.payloads.retain(|&seq, _| in_range(seq, total));
        self.invalid.retain(|&seq| in_range(seq, total));
    }

    /// 누락(또는 손상) 시퀀스 목록: [1, total] 중 유효하지 않은 것
    pub fn outstanding(&self, total: u32) -> Vec<SequenceNumber> {
        sequence_range(total)
            .filter(|seq| !self.payloads.contains_key(seq))
            .collect()
    }

    /// 수신률 계산
    pub fn receive_ratio(&self, total: u32) -> f64 {
        if total == 0 {
            return 1.0;
        }
        self.valid_count() as f64 / total as f64
    }

    /// 전체 초기화 (새 파일 요청 시)
    pub fn clear(&mut self) {
        self.payloads.clear();
        self.invalid.clear();
        self.duplicates = 0;
    }

    /// 시퀀스 순서대로 조립
    pub fn reassemble(&self, total: u32) -> Result<Bytes> {
        let missing = self.outstanding(total);
        if !missing.is_empty() {
            return Err(Error::Incomplete { missing });
        }

        let size = self.payloads.values().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(size);
        for seq in sequence_range(total) {
            if let Some(payload) = self.payloads.get(&seq) {
                data.extend_from_slice(payload);
            }
        }
        Ok(data.freeze())
    }
}

/// 임의 순서의 (시퀀스, 페이로드) 목록에서 바로 조립
pub fn reassemble<I>(segments: I, total: u32) -> Result<Bytes>
where
    I: IntoIterator<Item = (SequenceNumber, Bytes)>,
{
    let mut store = SegmentStore::new();
    for (sequence, payload) in segments {
        store.insert(sequence, payload);
    }
    store.reassemble(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::decode;

    fn sample(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[test]
    fn test_total_segments() {
        assert_eq!(total_segments(0, 1024), 0);
        assert_eq!(total_segments(1, 1024), 1);
        assert_eq!(total_segments(1024, 1024), 1);
        assert_eq!(total_segments(1025, 1024), 2);
        assert_eq!(total_segments(3 * 1024 + 17, 1024), 4);
    }

    #[test]
    fn test_split_reassemble_sizes() {
        let segmenter = Segmenter::new(100);
        for len in [0usize, 1, 100, 350] {
            let data = sample(len);
            let mut pieces = segmenter.split(&data);
            assert_eq!(pieces.len() as u32, total_segments(len as u64, 100));
            if let Some((first, _)) = pieces.first() {
                assert_eq!(*first, FIRST_SEQUENCE);
            }

            pieces.reverse();
            let rebuilt = reassemble(pieces, total_segments(len as u64, 100)).unwrap();
            assert_eq!(rebuilt, data, "len={}", len);
        }
    }

    #[test]
    fn test_reassemble_reports_missing() {
        let segmenter = Segmenter::new(10);
        let data = sample(45);
        let pieces: Vec<_> = segmenter
            .split(&data)
            .into_iter()
            .filter(|(seq, _)| *seq != 2 && *seq != 5)
            .collect();

        match reassemble(pieces, 5) {
            Err(Error::Incomplete { missing }) => assert_eq!(missing, vec![2, 5]),
            other => panic!("expected Incomplete, got {:?}", other),
        }
    }

    #[test]
    fn test_store_invalid_stays_outstanding() {
        let mut store = SegmentStore::new();
        store.insert(1, Bytes::from_static(b"a"));
        store.mark_invalid(2);
        store.insert(3, Bytes::from_static(b"c"));

        assert!(store.is_invalid(2));
        assert!(!store.contains(2));
        assert_eq!(store.outstanding(4), vec![2, 4]);

        store.insert(2, Bytes::from_static(b"b"));
        assert!(!store.is_invalid(2));
        store.mark_invalid(2);
        assert!(!store.is_invalid(2));

        assert!(!store.insert(3, Bytes::from_static(b"c")));
        assert_eq!(store.duplicates(), 1);
        assert_eq!(store.outstanding(3), Vec::<u32>::new());
        assert_eq!(store.reassemble(3).unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_truncate_to() {
        let mut store = SegmentStore::new();
        for seq in 1..=5 {
            store.insert(seq, Bytes::from_static(b"x"));
        }
        store.mark_invalid(7);
        store.truncate_to(3);
        assert_eq!(store.valid_count(), 3);
        assert_eq!(store.invalid_count(), 0);
    }

    #[test]
    fn test_sequence_range_at_u32_limit() {
        assert_eq!(sequence_range(0).count(), 0);
        assert_eq!(sequence_range(3).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(sequence_range(u32::MAX).next_back(), Some(u32::MAX));

        assert!(!in_range(0, 3));
        assert!(in_range(3, 3));
        assert!(!in_range(4, 3));
        assert!(in_range(u32::MAX, u32::MAX));
        assert!(!in_range(1, 0));

        let mut store = SegmentStore::new();
        store.insert(u32::MAX, Bytes::from_static(b"x"));
        store.insert(2, Bytes::from_static(b"y"));
        store.truncate_to(u32::MAX);
        assert_eq!(store.valid_count(), 2);
        store.truncate_to(2);
        assert_eq!(store.valid_count(), 1);
        assert!(store.contains(2));
    }

    #[test]
    fn test_encode_frames() {
        let segmenter = Segmenter::new(64);
        let data = sample(200);
        let frames = segmenter.encode_frames(&data);
        assert_eq!(frames.len(), 4);

        for (idx, frame) in frames.iter().enumerate() {
            let segment = decode(frame).unwrap();
            assert_eq!(segment.sequence(), FIRST_SEQUENCE + idx as u32);
            assert_eq!(segment.total(), 4);
            assert!(segment.checksum_valid());
        }
        assert_eq!(decode(&frames[3]).unwrap().payload.len(), 200 - 3 * 64);
    }
}
