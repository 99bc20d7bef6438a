//! SHA-224 다이제스트와 증분 해셔
//!
//! 청크, 매니페스트, 구성 전체가 모두 SHA-224 다이제스트로 콘텐츠 주소
//! 지정된다. 와이어에서는 원시 28바이트, 사람에게는 56자리 소문자 16진수.

use std::fmt;

use sha2::Digest;

use crate::error::{Error, Result};

/// 다이제스트 길이 (바이트)
pub const DIGEST_LEN: usize = 28;

/// SHA-224 다이제스트 (28바이트)
///
/// 바이트 동등성으로 비교하고, 맵 키로 쓸 수 있도록 전순서를 가진다.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha224([u8; DIGEST_LEN]);

impl Sha224 {
    /// 원시 바이트에서 생성
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// 원시 바이트 참조
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// 한 번에 다이제스트 계산
    pub fn digest(data: &[u8]) -> Self {
        Self(sha2::Sha224::digest(data).into())
    }

    /// 56자리 16진수 문자열에서 파싱
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidHash(e.to_string()))?;
        let bytes: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidHash(format!("{}자리 (56자리 필요)", s.len())))?;
        Ok(Self(bytes))
    }

    /// 소문자 16진수 문자열로 변환
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Sha224 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Sha224 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha224({})", &self.to_hex()[..16])
    }
}

/// 증분 SHA-224 해셔
///
/// `update`를 반복 호출하고 `finalize`로 소진시킨다. 파일 인덱싱은 파일
/// 순서를 보존한 채 해셔 하나를 여러 파일에 걸쳐 이어 쓴다.
pub struct Sha224Hasher(sha2::Sha224);

impl Sha224Hasher {
    pub fn new() -> Self {
        Self(sha2::Sha224::new())
    }

    /// 바이트 누적
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// 다이제스트를 얻고 해셔를 소진
    pub fn finalize(self) -> Sha224 {
        Sha224(self.0.finalize().into())
    }
}

impl Default for Sha224Hasher {
    fn default() -> Self {
        Self::new()
    }
}
