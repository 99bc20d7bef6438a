//! 매니페스트 직렬화/역직렬화
//!
//! 부팅 이미지 하나를 이루는 파일들과 그 청크 목록. 이름 정렬 순서로
//! 항목을 이어붙인 바이트 블롭이며, 블롭의 SHA-224가 매니페스트
//! 다이제스트(클라이언트의 첫 데이터 요청 주소)가 된다.
//!
//! 항목 인코딩: 이름 바이트 + 0x00 + 청크 수 be32 + 청크 기술자 40바이트씩

use crate::error::{Error, Result};
use crate::file::Chunk;

/// 파일 이름 -> 청크 목록의 정렬된 나열
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<(String, Vec<Chunk>)>,
}

impl Manifest {
    /// 항목들로 매니페스트를 만든다. 입력 순서와 무관하게 이름으로 정렬해
    /// 다이제스트가 순서에 독립이 되게 한다.
    pub fn new(mut entries: Vec<(String, Vec<Chunk>)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    /// 정렬된 (이름, 청크 목록) 항목들
    pub fn entries(&self) -> &[(String, Vec<Chunk>)] {
        &self.entries
    }

    /// 와이어 형식으로 직렬화
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (name, chunks) in &self.entries {
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&(chunks.len() as u32).to_be_bytes());
            for chunk in chunks {
                chunk.encode_into(&mut buf);
            }
        }
        buf
    }

    /// 와이어 형식에서 파싱 (직렬화의 역)
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let name_end = data[pos..]
                .iter()
                .position(|&b| b == 0)
                .map(|i| pos + i)
                .ok_or_else(|| Error::Manifest(format!("{pos} 오프셋에서 이름이 끝나지 않음")))?;
            let name = std::str::from_utf8(&data[pos..name_end])
                .map_err(|e| Error::Manifest(format!("이름이 UTF-8이 아님: {e}")))?
                .to_string();
            pos = name_end + 1;

            if data.len() - pos < 4 {
                return Err(Error::Manifest(format!("{pos} 오프셋에서 절단됨")));
            }
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&data[pos..pos + 4]);
            let count = u32::from_be_bytes(raw) as usize;
            pos += 4;

            if (data.len() - pos) / Chunk::WIRE_SIZE < count {
                return Err(Error::Manifest(format!("{pos} 오프셋에서 절단됨")));
            }
            let mut chunks = Vec::with_capacity(count);
            for _ in 0..count {
                // 길이는 위에서 확인했다
                let chunk = Chunk::decode(&data[pos..])
                    .ok_or_else(|| Error::Manifest(format!("{pos} 오프셋에서 절단됨")))?;
                chunks.push(chunk);
                pos += Chunk::WIRE_SIZE;
            }
            entries.push((name, chunks));
        }
        Ok(Self::new(entries))
    }
}
