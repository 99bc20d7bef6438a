//! 와이어 프로토콜 메시지 정의
//!
//! 네 가지 UDP 메시지. 모든 정수는 빅엔디안, 다이제스트는 원시 28바이트.
//! 태그 0x1/0x2는 요청과 응답에서 재사용된다. 서버는 요청만, 클라이언트는
//! 응답만 수신하므로 문맥으로 구분된다.

use bytes::Bytes;

use crate::hash::{Sha224, DIGEST_LEN};
use crate::MAX_DATA_SIZE;

/// 청크 목록 요청 태그 (클라이언트 -> 서버)
pub const CHUNK_LIST_REQUEST: u32 = 0x1;
/// 데이터 요청 태그 (클라이언트 -> 서버)
pub const DATA_REQUEST: u32 = 0x2;
/// 청크 목록 정보 태그 (서버 -> 클라이언트)
pub const CHUNK_LIST_INFO: u32 = 0x1;
/// 데이터 패킷 태그 (서버 -> 클라이언트)
pub const DATA_PACKET: u32 = 0x2;

/// 버퍼 선두의 메시지 태그를 읽는다 (4바이트 미만이면 None)
pub fn message_type(buf: &[u8]) -> Option<u32> {
    let tag: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(tag))
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_be_bytes(raw)
}

fn read_hash(buf: &[u8], at: usize) -> Sha224 {
    let mut raw = [0u8; DIGEST_LEN];
    raw.copy_from_slice(&buf[at..at + DIGEST_LEN]);
    Sha224::from_bytes(raw)
}

/// 청크 목록 요청
///
/// 구성 다이제스트로 매니페스트의 존재를 묻는 부트스트랩 메시지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkListRequest {
    /// 구성 다이제스트
    pub hash: Sha224,
}

impl ChunkListRequest {
    /// 직렬화 크기 (태그 4 + 다이제스트 28)
    pub const SIZE: usize = 4 + DIGEST_LEN;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&CHUNK_LIST_REQUEST.to_be_bytes());
        buf.extend_from_slice(self.hash.as_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != Self::SIZE || message_type(buf) != Some(CHUNK_LIST_REQUEST) {
            return None;
        }
        Some(Self {
            hash: read_hash(buf, 4),
        })
    }
}

/// 청크 목록 정보 (청크 목록 요청에 대한 유니캐스트 응답)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkListInfo {
    /// 매니페스트 블롭의 길이 (바이트)
    pub length: u32,

    /// 매니페스트 다이제스트 (이후 데이터 요청에 쓰는 주소)
    pub hash: Sha224,
}

impl ChunkListInfo {
    /// 직렬화 크기 (태그 4 + 길이 4 + 다이제스트 28)
    pub const SIZE: usize = 4 + 4 + DIGEST_LEN;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&CHUNK_LIST_INFO.to_be_bytes());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.extend_from_slice(self.hash.as_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != Self::SIZE || message_type(buf) != Some(CHUNK_LIST_INFO) {
            return None;
        }
        Some(Self {
            length: read_u32(buf, 4),
            hash: read_hash(buf, 8),
        })
    }
}

/// 데이터 요청
///
/// `start`/`length`는 파일이 아니라 청크 내부의 바이트 범위다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRequest {
    /// 청크 내 시작 오프셋
    pub start: u32,

    /// 요청 길이 (바이트)
    pub length: u32,

    /// 요청하는 청크의 다이제스트
    pub chunk: Sha224,
}

impl DataRequest {
    /// 직렬화 크기 (태그 4 + 시작 4 + 길이 4 + 다이제스트 28)
    pub const SIZE: usize = 4 + 4 + 4 + DIGEST_LEN;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&DATA_REQUEST.to_be_bytes());
        buf.extend_from_slice(&self.start.to_be_bytes());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.extend_from_slice(self.chunk.as_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != Self::SIZE || message_type(buf) != Some(DATA_REQUEST) {
            return None;
        }
        Some(Self {
            start: read_u32(buf, 4),
            length: read_u32(buf, 8),
            chunk: read_hash(buf, 12),
        })
    }
}

/// 데이터 패킷 (브로드캐스트)
///
/// 헤더 뒤의 나머지 바이트 전체가 페이로드다. 페이로드는 최대 1400바이트로,
/// 이더넷 MTU 아래에서 IP 단편화 없이 전달되는 단편화 단위가 된다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// 청크 내 절대 오프셋
    pub offset: u32,

    /// 소속 청크의 다이제스트
    pub chunk: Sha224,

    /// 페이로드
    pub data: Bytes,
}

impl DataPacket {
    /// 최소 직렬화 크기 (태그 4 + 오프셋 4 + 다이제스트 28, 빈 페이로드)
    pub const MIN_SIZE: usize = 4 + 4 + DIGEST_LEN;

    /// 최대 직렬화 크기
    pub const MAX_SIZE: usize = Self::MIN_SIZE + MAX_DATA_SIZE;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MIN_SIZE + self.data.len());
        buf.extend_from_slice(&DATA_PACKET.to_be_bytes());
        buf.extend_from_slice(&self.offset.to_be_bytes());
        buf.extend_from_slice(self.chunk.as_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::MIN_SIZE
            || buf.len() > Self::MAX_SIZE
            || message_type(buf) != Some(DATA_PACKET)
        {
            return None;
        }
        Some(Self {
            offset: read_u32(buf, 4),
            chunk: read_hash(buf, 8),
            data: Bytes::copy_from_slice(&buf[Self::MIN_SIZE..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_list_request_layout() {
        let hash = Sha224::digest(b"x");
        let bytes = ChunkListRequest { hash }.to_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..], hash.as_bytes());

        let parsed = ChunkListRequest::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.hash, hash);
    }

    #[test]
    fn test_data_request_big_endian() {
        let req = DataRequest {
            start: 0x01020304,
            length: 0x0a0b0c0d,
            chunk: Sha224::digest(b"y"),
        };
        let bytes = req.to_bytes();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[..4], &[0, 0, 0, 2]);
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..12], &[0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(DataRequest::from_bytes(&bytes), Some(req));
    }

    #[test]
    fn test_chunk_list_info_size() {
        let info = ChunkListInfo {
            length: 92,
            hash: Sha224::digest(b"m"),
        };
        let bytes = info.to_bytes();
        assert_eq!(bytes.len(), 36);
        assert_eq!(ChunkListInfo::from_bytes(&bytes), Some(info));
    }

    #[test]
    fn test_data_packet_trailing_payload() {
        let packet = DataPacket {
            offset: 1400,
            chunk: Sha224::digest(b"z"),
            data: Bytes::from_static(b"hello"),
        };
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), 41);

        let parsed = DataPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.offset, 1400);
        assert_eq!(parsed.data.as_ref(), b"hello");

        // 빈 페이로드도 유효하다
        let empty = DataPacket {
            offset: 0,
            chunk: Sha224::digest(b"z"),
            data: Bytes::new(),
        };
        assert!(DataPacket::from_bytes(&empty.to_bytes()).is_some());
    }

    #[test]
    fn test_reject_malformed() {
        // 태그를 읽기에도 짧은 버퍼
        assert_eq!(message_type(&[0, 0, 1]), None);

        // 최소 크기 미달
        assert!(DataPacket::from_bytes(&[0, 0, 0, 2, 0, 0, 0, 0]).is_none());

        // 알 수 없는 태그
        let mut bytes = ChunkListRequest {
            hash: Sha224::digest(b"x"),
        }
        .to_bytes();
        bytes[3] = 9;
        assert!(ChunkListRequest::from_bytes(&bytes).is_none());

        // 고정 크기 메시지는 꼬리 바이트를 허용하지 않는다
        let mut long = DataRequest {
            start: 0,
            length: 1,
            chunk: Sha224::digest(b"x"),
        }
        .to_bytes();
        long.push(0);
        assert!(DataRequest::from_bytes(&long).is_none());

        // MTU를 넘는 페이로드
        let oversize = vec![0u8; DataPacket::MAX_SIZE + 1];
        assert!(DataPacket::from_bytes(&oversize).is_none());
    }
}
