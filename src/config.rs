//! 구성 파일 로딩
//!
//! JSON 구성 하나가 서브넷 하나에 고정된 부팅 이미지를 기술한다. 적재
//! 시점에 모든 파일을 인덱싱하고, 이름 정렬 순서로 해셔 하나를 이어 써서
//! 구성 다이제스트를 만든다. 동일한 구성을 돌리는 서버들끼리 이 값이
//! 일치하므로, 커널 커맨드라인에 실어 부팅 후 이미지 검증에 쓴다.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::file::InFile;
use crate::hash::{Sha224, Sha224Hasher};
use crate::manifest::Manifest;
use crate::DEFAULT_CHUNK_SIZE;

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_ip_method() -> String {
    "dhcp".to_string()
}

/// JSON 구성 파일의 원시 형태
#[derive(Debug, Deserialize)]
struct RawConfig {
    /// CIDR 표기 서브넷 (예: "192.168.1.0/24")
    subnet: String,

    #[serde(default = "default_chunk_size")]
    chunk_size: u32,

    /// 스왑 크기 (MiB)
    #[serde(default)]
    swap_size: f64,

    /// 루트 파티션 크기 (MiB)
    #[serde(default)]
    root_size: f64,

    /// 커널 ip= 파라미터 값
    #[serde(default = "default_ip_method")]
    ip_method: String,

    /// 커맨드라인에 덧붙일 인자
    #[serde(default)]
    extra_args: String,

    /// 매니페스트 이름 -> 파일 경로 (상대 경로는 구성 파일 기준)
    files: BTreeMap<String, PathBuf>,
}

/// 적재 완료된 구성
pub struct DownloadConfig {
    ip: Ipv4Addr,
    mask: Ipv4Addr,
    chunk_size: u32,
    swap_size: u64,
    root_size: u64,
    ip_method: String,
    extra_args: String,
    files: BTreeMap<String, InFile>,
    config_hash: Sha224,
}

impl DownloadConfig {
    /// 구성 파일을 읽고 모든 파일을 인덱싱한다
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw: RawConfig = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let (ip, mask) = parse_subnet(&raw.subnet)?;

        // BTreeMap 순회는 이름 정렬 순서이므로 다이제스트가 입력 순서에
        // 독립이 된다
        let mut hasher = Sha224Hasher::new();
        let mut files = BTreeMap::new();
        for (name, rel) in &raw.files {
            let file_path = dir.join(rel);
            let file = InFile::open(&file_path, raw.chunk_size, &mut hasher)?;
            info!(
                "파일 인덱싱: {} ({} 청크)",
                file_path.display(),
                file.chunks().len()
            );
            files.insert(name.clone(), file);
        }

        Ok(Self {
            ip,
            mask,
            chunk_size: raw.chunk_size,
            swap_size: raw.swap_size as u64,
            root_size: raw.root_size as u64,
            ip_method: raw.ip_method,
            extra_args: raw.extra_args,
            files,
            config_hash: hasher.finalize(),
        })
    }

    /// 주소가 이 구성의 서브넷에 속하는가
    pub fn matches_address(&self, addr: Ipv4Addr) -> bool {
        u32::from(self.ip) & u32::from(self.mask) == u32::from(addr) & u32::from(self.mask)
    }

    /// 구성 다이제스트 (정렬 순서로 모든 파일 내용을 이어 해싱한 값)
    pub fn config_hash(&self) -> Sha224 {
        self.config_hash
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn swap_size(&self) -> u64 {
        self.swap_size
    }

    pub fn root_size(&self) -> u64 {
        self.root_size
    }

    pub fn ip_method(&self) -> &str {
        &self.ip_method
    }

    pub fn extra_args(&self) -> &str {
        &self.extra_args
    }

    /// 인덱싱된 파일들 (이름 정렬 순서)
    pub fn files(&self) -> &BTreeMap<String, InFile> {
        &self.files
    }

    /// 이 구성의 매니페스트
    pub fn manifest(&self) -> Manifest {
        Manifest::new(
            self.files
                .iter()
                .map(|(name, file)| (name.clone(), file.chunks().to_vec()))
                .collect(),
        )
    }
}

/// "a.b.c.d/prefix" 형태의 서브넷을 (주소, 넷마스크)로 파싱
fn parse_subnet(subnet: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let (ip, prefix) = subnet
        .split_once('/')
        .ok_or_else(|| Error::InvalidSubnet(subnet.to_string()))?;
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| Error::InvalidSubnet(subnet.to_string()))?;
    let prefix: u32 = prefix
        .parse()
        .map_err(|_| Error::InvalidSubnet(subnet.to_string()))?;
    if prefix > 32 {
        return Err(Error::InvalidSubnet(subnet.to_string()));
    }
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    Ok((ip, Ipv4Addr::from(mask)))
}

/// 구성 파일 여러 개를 순서대로 적재
pub fn parse_configs(paths: &[impl AsRef<Path>]) -> Result<Vec<DownloadConfig>> {
    paths.iter().map(DownloadConfig::load).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subnet() {
        let (ip, mask) = parse_subnet("192.168.1.0/24").unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(mask, Ipv4Addr::new(255, 255, 255, 0));

        let (_, mask) = parse_subnet("10.0.0.0/8").unwrap();
        assert_eq!(mask, Ipv4Addr::new(255, 0, 0, 0));

        let (_, mask) = parse_subnet("0.0.0.0/0").unwrap();
        assert_eq!(mask, Ipv4Addr::new(0, 0, 0, 0));

        let (_, mask) = parse_subnet("1.2.3.4/32").unwrap();
        assert_eq!(mask, Ipv4Addr::new(255, 255, 255, 255));

        assert!(parse_subnet("192.168.1.0").is_err());
        assert!(parse_subnet("192.168.1.0/33").is_err());
        assert!(parse_subnet("nope/24").is_err());
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vmlinuz"), b"kernel bytes").unwrap();
        let config_path = dir.path().join("lab.json");
        std::fs::write(
            &config_path,
            r#"{
                "subnet": "192.168.7.0/24",
                "chunk_size": 8,
                "swap_size": 1024.0,
                "root_size": 2048.5,
                "ip_method": "dhcp",
                "extra_args": "quiet",
                "files": {"vmlinuz": "vmlinuz"}
            }"#,
        )
        .unwrap();

        let config = DownloadConfig::load(&config_path).unwrap();
        assert!(config.matches_address(Ipv4Addr::new(192, 168, 7, 42)));
        assert!(!config.matches_address(Ipv4Addr::new(192, 168, 8, 42)));
        assert_eq!(config.chunk_size(), 8);
        assert_eq!(config.swap_size(), 1024);
        assert_eq!(config.root_size(), 2048);
        assert_eq!(config.files().len(), 1);

        // 파일 내용이 같으면 구성 다이제스트도 같다
        let again = DownloadConfig::load(&config_path).unwrap();
        assert_eq!(config.config_hash(), again.config_hash());
        assert_eq!(config.config_hash(), Sha224::digest(b"kernel bytes"));

        // 매니페스트에는 8바이트 단위 청크가 들어간다
        let manifest = config.manifest();
        assert_eq!(manifest.entries().len(), 1);
        assert_eq!(manifest.entries()[0].1.len(), 2);
    }
}
