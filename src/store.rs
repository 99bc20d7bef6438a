//! 콘텐츠 주소 인덱스 (서버측)
//!
//! 다이제스트를 바이트로 해석하는 두 개의 분리된 맵: 매니페스트 블롭과
//! 파일 청크. 기동 시 구성들로 채워진 뒤에는 읽기 전용이라 잠금이 필요
//! 없다. 하나의 다이제스트는 두 맵 중 한쪽에만 존재한다.

use std::collections::HashMap;

use tracing::warn;

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::file::{Chunk, InFile};
use crate::hash::Sha224;

/// 서버가 제공할 수 있는 모든 청크의 인덱스
#[derive(Default)]
pub struct ChunkStore {
    /// 매니페스트 다이제스트 -> 직렬화된 매니페스트
    manifests: HashMap<Sha224, Vec<u8>>,

    /// 청크 다이제스트 -> (기술자, 뒷받침 파일)
    file_chunks: HashMap<Sha224, (Chunk, InFile)>,

    /// 구성 다이제스트 -> 매니페스트 다이제스트 (부트스트랩 응답용)
    by_config: HashMap<Sha224, Sha224>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 구성 하나를 인덱스에 등록한다
    pub fn add_config(&mut self, config: &DownloadConfig) {
        let manifest_bytes = config.manifest().serialize();
        let manifest_hash = Sha224::digest(&manifest_bytes);
        self.by_config.insert(config.config_hash(), manifest_hash);
        self.manifests.insert(manifest_hash, manifest_bytes);

        for (_, file) in config.files() {
            for chunk in file.chunks() {
                if self.manifests.contains_key(&chunk.hash) {
                    // 매니페스트와 파일 청크 맵은 서로소여야 한다
                    warn!("매니페스트와 충돌하는 청크 무시: {}", chunk.hash);
                    continue;
                }
                self.file_chunks
                    .entry(chunk.hash)
                    .or_insert_with(|| (*chunk, file.clone()));
            }
        }
    }

    /// 구성 다이제스트로 매니페스트의 (길이, 다이제스트)를 찾는다
    pub fn manifest_info(&self, config_hash: &Sha224) -> Option<(u32, Sha224)> {
        let manifest_hash = self.by_config.get(config_hash)?;
        let bytes = self.manifests.get(manifest_hash)?;
        Some((bytes.len() as u32, *manifest_hash))
    }

    /// 다이제스트를 바이트로 해석한다
    ///
    /// 매니페스트 맵을 먼저, 그다음 파일 청크 맵을 조회한다. 파일 청크는
    /// 매번 새로 읽는다 (서버는 디스크 캐시를 두지 않는다).
    pub fn fetch(&self, hash: &Sha224) -> Result<Vec<u8>> {
        if let Some(bytes) = self.manifests.get(hash) {
            return Ok(bytes.clone());
        }
        if let Some((chunk, file)) = self.file_chunks.get(hash) {
            return file.read_chunk(chunk);
        }
        Err(Error::UnknownChunk(*hash))
    }

    /// 등록된 파일 청크 수
    pub fn chunk_count(&self) -> usize {
        self.file_chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use std::io::Write;

    fn store_with_one_config() -> (tempfile::TempDir, ChunkStore, Sha224) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kernel"), b"KERNELDATA").unwrap();
        std::fs::write(dir.path().join("initrd"), b"INITRDDATA").unwrap();

        let config_path = dir.path().join("boot.json");
        let mut f = std::fs::File::create(&config_path).unwrap();
        write!(
            f,
            r#"{{"subnet": "10.0.0.0/24", "chunk_size": 4,
                "files": {{"kernel": "kernel", "initrd": "initrd"}}}}"#
        )
        .unwrap();

        let config = config::DownloadConfig::load(&config_path).unwrap();
        let config_hash = config.config_hash();
        let mut store = ChunkStore::new();
        store.add_config(&config);
        (dir, store, config_hash)
    }

    #[test]
    fn test_manifest_info_and_fetch() {
        let (_dir, store, config_hash) = store_with_one_config();

        let (length, manifest_hash) = store.manifest_info(&config_hash).unwrap();
        let bytes = store.fetch(&manifest_hash).unwrap();
        assert_eq!(bytes.len() as u32, length);
        assert_eq!(Sha224::digest(&bytes), manifest_hash);

        // 파일당 청크 3개, 마지막 "TA" 청크는 두 파일이 공유한다
        assert_eq!(store.chunk_count(), 5);
        let chunk_hash = Sha224::digest(b"KERN");
        assert_eq!(store.fetch(&chunk_hash).unwrap(), b"KERN");

        assert!(store.manifest_info(&Sha224::digest(b"nope")).is_none());
        assert!(matches!(
            store.fetch(&Sha224::digest(b"nope")),
            Err(Error::UnknownChunk(_))
        ));
    }
}
