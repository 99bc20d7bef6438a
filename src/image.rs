//! 이미지 기록기 (클라이언트측)
//!
//! 파싱된 매니페스트로 대상 파일들을 열고, 내려받은 청크를 그 다이제스트를
//! 참조하는 모든 (파일, 오프셋) 위치에 기록한다. 디스크에 이미 올바르게
//! 있는 청크는 건너뛰므로 재부팅 후 이어받기가 된다.

use std::collections::HashMap;

use tracing::debug;

use crate::error::Result;
use crate::file::{Chunk, OutFile};
use crate::hash::Sha224;
use crate::manifest::Manifest;

/// 기록 대상 파일 집합
pub struct Image {
    files: Vec<(String, OutFile)>,

    /// 다이제스트 -> 그 다이제스트를 참조하는 (기술자, 파일 인덱스) 목록.
    /// 같은 내용이 여러 파일이나 여러 오프셋에 나타날 수 있다.
    chunk_map: HashMap<Sha224, Vec<(Chunk, usize)>>,
}

impl Image {
    /// 매니페스트의 각 항목 이름을 경로 삼아 파일을 연다 (없으면 생성)
    pub fn open(manifest: &Manifest) -> Result<Self> {
        let mut files = Vec::new();
        let mut chunk_map: HashMap<Sha224, Vec<(Chunk, usize)>> = HashMap::new();
        for (name, chunks) in manifest.entries() {
            let index = files.len();
            let out = OutFile::create(name, chunks.clone())?;
            for chunk in chunks {
                chunk_map.entry(chunk.hash).or_default().push((*chunk, index));
            }
            files.push((name.clone(), out));
        }
        Ok(Self { files, chunk_map })
    }

    /// 아직 내려받아야 하는 청크들 (다이제스트당 하나)
    pub fn missing_chunks(&self) -> Result<Vec<Chunk>> {
        let mut seen = HashMap::new();
        for (name, file) in &self.files {
            for chunk in file.missing_chunks()? {
                seen.entry(chunk.hash).or_insert(chunk);
                debug!("누락 청크: {} ({})", chunk.hash, name);
            }
        }
        Ok(seen.into_values().collect())
    }

    /// 검증된 청크 바이트를 참조하는 모든 위치에 기록한다
    pub fn write_chunk(&self, hash: &Sha224, data: &[u8]) -> Result<()> {
        if let Some(positions) = self.chunk_map.get(hash) {
            for (chunk, index) in positions {
                self.files[*index].1.write_chunk(chunk, data)?;
            }
        }
        Ok(())
    }

    /// 대상 파일 수
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}
