//! 에러 타입 정의

use thiserror::Error;

use crate::segment::DecodeError;

/// SRFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("유효하지 않은 파일 이름: {0:?}")]
    InvalidFileName(String),

    #[error("파일 없음: {0}")]
    FileNotFound(String),

    #[error("잘못된 요청: {0}")]
    MalformedRequest(String),

    #[error("활성 전송 없음: {0}")]
    NoActiveTransfer(String),

    #[error("유효하지 않은 시퀀스 목록: {0}")]
    InvalidSequenceList(String),

    #[error("디코드 에러: {0}")]
    Decode(#[from] DecodeError),

    #[error("CRC 불일치: sequence={sequence}, expected {expected:08X}, got {got:08X}")]
    ChecksumMismatch { sequence: u32, expected: u32, got: u32 },

    #[error("조립 불가: {} 세그먼트 누락", .missing.len())]
    Incomplete { missing: Vec<u32> },

    #[error("파일 무결성 실패: {0}")]
    IntegrityFailure(String),

    #[error("재전송 한도 초과: {rounds} 라운드 후 {} 세그먼트 누락", .outstanding.len())]
    RetryBudgetExhausted { rounds: u32, outstanding: Vec<u32> },

    #[error("서버 응답 없음: {0}")]
    NoResponse(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
