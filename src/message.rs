//! 제어 프로토콜 메시지 정의
//!
//! 클라이언트 → 서버: ASCII 텍스트 명령
//! - `GET <name>`
//! - `RETR <name> <n1,n2,...>`
//! - `DONE <name>`
//!
//! 서버 → 클라이언트 방향은 전부 바이너리 프레임이고, 에러는 에러 프레임의
//! 페이로드로 `ERR <TAG> <사유>` 텍스트를 싣는다.

use std::fmt;

use crate::segment::SequenceNumber;
use crate::Error;

/// 에러 태그 접두어
pub const ERROR_PREFIX: &str = "ERR";

/// 클라이언트 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// 파일 전체 전송 요청
    Get { name: String },

    /// 지정 시퀀스 재전송 요청
    Retr {
        name: String,
        sequences: Vec<SequenceNumber>,
    },

    /// 전송 종료 (서버 캐시 해제)
    Done { name: String },
}

impl ControlMessage {
    pub fn name(&self) -> &str {
        match self {
            ControlMessage::Get { name }
            | ControlMessage::Retr { name, .. }
            | ControlMessage::Done { name } => name,
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// 바이트에서 파싱
    pub fn parse(bytes: &[u8]) -> Result<Self, ErrorReason> {
        let text = std::str::from_utf8(bytes).map_err(|_| ErrorReason::MalformedRequest)?;
        let mut parts = text.split_whitespace();

        let cmd = parts.next().ok_or(ErrorReason::MalformedRequest)?;
        let name = parts.next().ok_or(ErrorReason::MalformedRequest)?.to_string();

        match cmd.to_ascii_uppercase().as_str() {
            // GET 뒤의 토큰(구 클라이언트의 드롭 목록)은 무시
            "GET" => Ok(ControlMessage::Get { name }),
            "RETR" => {
                let list = parts.next().ok_or(ErrorReason::InvalidSequenceList)?;
                if parts.next().is_some() {
                    return Err(ErrorReason::InvalidSequenceList);
                }
                let sequences = parse_sequence_list(list).ok_or(ErrorReason::InvalidSequenceList)?;
                Ok(ControlMessage::Retr { name, sequences })
            }
            "DONE" => Ok(ControlMessage::Done { name }),
            _ => Err(ErrorReason::MalformedRequest),
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::Get { name } => write!(f, "GET {}", name),
            ControlMessage::Retr { name, sequences } => {
                write!(f, "RETR {} {}", name, format_sequence_list(sequences))
            }
            ControlMessage::Done { name } => write!(f, "DONE {}", name),
        }
    }
}

/// `3,7,12` 형식 파싱. 빈 목록이나 숫자가 아닌 항목은 None
pub fn parse_sequence_list(list: &str) -> Option<Vec<SequenceNumber>> {
    let sequences = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<SequenceNumber>().ok())
        .collect::<Option<Vec<_>>>()?;

    if sequences.is_empty() {
        return None;
    }
    Some(sequences)
}

pub fn format_sequence_list(sequences: &[SequenceNumber]) -> String {
    sequences
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// 서버 에러 사유 (기계 판독용 태그)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    FileNotFound,
    MalformedRequest,
    NoActiveTransfer,
    InvalidSequenceList,
}

impl ErrorReason {
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorReason::FileNotFound => "FILE_NOT_FOUND",
            ErrorReason::MalformedRequest => "MALFORMED_REQUEST",
            ErrorReason::NoActiveTransfer => "NO_ACTIVE_TRANSFER",
            ErrorReason::InvalidSequenceList => "INVALID_SEQUENCE_LIST",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "FILE_NOT_FOUND" => Some(ErrorReason::FileNotFound),
            "MALFORMED_REQUEST" => Some(ErrorReason::MalformedRequest),
            "NO_ACTIVE_TRANSFER" => Some(ErrorReason::NoActiveTransfer),
            "INVALID_SEQUENCE_LIST" => Some(ErrorReason::InvalidSequenceList),
            _ => None,
        }
    }

    /// 기본 사유 문구
    pub fn default_detail(&self) -> &'static str {
        match self {
            ErrorReason::FileNotFound => "File not found",
            ErrorReason::MalformedRequest => "Invalid request format",
            ErrorReason::NoActiveTransfer => "No active transfer for this file",
            ErrorReason::InvalidSequenceList => "Invalid sequence list for RETR",
        }
    }

    /// 로컬 에러로 변환
    pub fn into_error(self, detail: String) -> Error {
        match self {
            ErrorReason::FileNotFound => Error::FileNotFound(detail),
            ErrorReason::MalformedRequest => Error::MalformedRequest(detail),
            ErrorReason::NoActiveTransfer => Error::NoActiveTransfer(detail),
            ErrorReason::InvalidSequenceList => Error::InvalidSequenceList(detail),
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// 에러 프레임 페이로드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub reason: ErrorReason,
    pub detail: String,
}

impl ErrorMessage {
    pub fn new(reason: ErrorReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn from_reason(reason: ErrorReason) -> Self {
        Self::new(reason, reason.default_detail())
    }

    /// `ERR <TAG> <사유>` 텍스트
    pub fn to_text(&self) -> String {
        format!("{} {} {}", ERROR_PREFIX, self.reason.tag(), self.detail)
    }

    /// 에러 프레임 페이로드 파싱
    ///
    /// 태그를 모르면 MalformedRequest 로 취급하고 전체 텍스트를 사유로 보존
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let mut parts = text.splitn(3, ' ');

        if parts.next() == Some(ERROR_PREFIX) {
            if let Some(reason) = parts.next().and_then(ErrorReason::from_tag) {
                let detail = parts.next().unwrap_or_default().trim().to_string();
                return Self::new(reason, detail);
            }
        }

        Self::new(ErrorReason::MalformedRequest, text.trim().to_string())
    }

    pub fn into_error(self) -> Error {
        self.reason.into_error(self.detail)
    }
}
