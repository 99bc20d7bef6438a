//! # pixie
//!
//! LAN 네트워크 부트 이미지 배포 서비스
//!
//! ## 핵심 특징
//! - **콘텐츠 주소 지정**: 모든 청크는 SHA-224 다이제스트로 식별
//! - **브로드캐스트 전송**: 요청된 청크를 서브넷 브로드캐스트로 송신,
//!   동시에 부팅하는 클라이언트들이 대역폭을 공유
//! - **재요청 기반 복구**: ACK 없이, 타임아웃 시 전체 범위 재요청
//! - **희소 파일 인식**: 홀을 건너뛰고 데이터 구간만 인덱싱
//! - **매니페스트 부트스트랩**: 파일 목록 자체를 하나의 청크로 취급

pub mod broadcast;
pub mod config;
pub mod error;
pub mod file;
pub mod hash;
pub mod http;
pub mod image;
pub mod manifest;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod stats;
pub mod store;

pub use broadcast::BroadcastChooser;
pub use config::DownloadConfig;
pub use error::{Error, Result};
pub use file::{Chunk, InFile, OutFile};
pub use hash::{Sha224, Sha224Hasher};
pub use http::HttpServer;
pub use image::Image;
pub use manifest::Manifest;
pub use message::{ChunkListInfo, ChunkListRequest, DataPacket, DataRequest};
pub use receiver::Receiver;
pub use sender::ChunkSender;
pub use server::Server;
pub use stats::TransferStats;
pub use store::ChunkStore;

use std::time::Duration;

/// 서버 UDP 포트
pub const SERVER_PORT: u16 = 7494;

/// 클라이언트 UDP 포트 (데이터 패킷은 이 포트로 브로드캐스트된다)
pub const CLIENT_PORT: u16 = 7495;

/// 데이터 패킷 페이로드 최대 크기 (바이트, 단편화 단위)
pub const MAX_DATA_SIZE: usize = 1400;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: u32 = 1 << 22;

/// 재요청 타임아웃 (부트스트랩과 재조립 공용)
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// 기본 HTTP 포트 (PIXIE_HTTP_PORT 환경변수로 재정의 가능)
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// 기본 HTTP 바인드 주소 (PIXIE_HTTP_ADDR 환경변수로 재정의 가능)
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0";
