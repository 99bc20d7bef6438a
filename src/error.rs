//! 에러 타입 정의

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::hash::Sha224;

/// pixie 에러 타입
///
/// 치명적인 것은 기동 단계의 에러뿐이다. 프로토콜 수준 문제는 호출측에서
/// 로그 후 폐기하며 피어를 중단시키지 않는다.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 파싱 에러: {0}")]
    Json(#[from] serde_json::Error),

    #[error("유효하지 않은 해시: {0}")]
    InvalidHash(String),

    #[error("유효하지 않은 서브넷: {0}")]
    InvalidSubnet(String),

    #[error("알 수 없는 주소: {0}")]
    UnknownAddress(Ipv4Addr),

    #[error("알 수 없는 청크: {0}")]
    UnknownChunk(Sha224),

    #[error("손상된 매니페스트: {0}")]
    Manifest(String),

    #[error("설정 에러: {0}")]
    Config(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
