//! 브로드캐스트 주소 선택
//!
//! 클라이언트의 유니캐스트 주소에서 그 클라이언트가 속한 로컬 서브넷의
//! 브로드캐스트 주소를 고른다. 어느 서브넷에도 속하지 않으면 에러다
//! (오프링크 클라이언트에게는 송신을 거부한다).

use std::io;
use std::net::Ipv4Addr;

use nix::net::if_::InterfaceFlags;
use tracing::info;

use crate::error::{Error, Result};

/// (인터페이스 주소, 넷마스크, 브로드캐스트 주소) 목록
pub struct BroadcastChooser {
    entries: Vec<(Ipv4Addr, Ipv4Addr, Ipv4Addr)>,
}

impl BroadcastChooser {
    /// 브로드캐스트 플래그가 켜진 IPv4 인터페이스를 모두 수집한다
    pub fn discover() -> Result<Self> {
        let addrs = nix::ifaddrs::getifaddrs()
            .map_err(|e| Error::Io(io::Error::from_raw_os_error(e as i32)))?;
        let mut entries = Vec::new();
        for ifaddr in addrs {
            if !ifaddr.flags.contains(InterfaceFlags::IFF_BROADCAST) {
                continue;
            }
            let (Some(addr), Some(mask), Some(bcast)) =
                (ifaddr.address, ifaddr.netmask, ifaddr.broadcast)
            else {
                continue;
            };
            let (Some(addr), Some(mask), Some(bcast)) = (
                addr.as_sockaddr_in(),
                mask.as_sockaddr_in(),
                bcast.as_sockaddr_in(),
            ) else {
                continue;
            };
            info!(
                "인터페이스 {} 발견: ip {}, 넷마스크 {}, 브로드캐스트 {}",
                ifaddr.interface_name,
                addr.ip(),
                mask.ip(),
                bcast.ip()
            );
            entries.push((addr.ip(), mask.ip(), bcast.ip()));
        }
        Ok(Self { entries })
    }

    /// 주어진 목록으로 생성
    pub fn from_entries(entries: Vec<(Ipv4Addr, Ipv4Addr, Ipv4Addr)>) -> Self {
        Self { entries }
    }

    /// 클라이언트 주소가 속한 서브넷의 브로드캐스트 주소
    pub fn resolve(&self, client: Ipv4Addr) -> Result<Ipv4Addr> {
        for &(addr, mask, bcast) in &self.entries {
            if u32::from(addr) & u32::from(mask) == u32::from(client) & u32::from(mask) {
                return Ok(bcast);
            }
        }
        Err(Error::UnknownAddress(client))
    }
}
