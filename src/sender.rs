//! 청크 송신자 (서버측)
//!
//! - (다이제스트, 시작, 길이, 목적지) 요청 큐와 중복 제거 집합
//! - 콘텐츠 주소 인덱스에서 바이트를 읽어 1400바이트 단위로 단편화
//! - 서브넷 브로드캐스트로 송신하므로 같은 바이트가 필요한 다른
//!   클라이언트들이 부수적으로 함께 수신한다

use std::collections::{HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::hash::Sha224;
use crate::message::DataPacket;
use crate::store::ChunkStore;
use crate::{CLIENT_PORT, MAX_DATA_SIZE};

type QueueEntry = (Sha224, u32, u32, Ipv4Addr);

#[derive(Default)]
struct SendQueue {
    queue: VecDeque<QueueEntry>,
    enqueued: HashSet<QueueEntry>,
}

/// 브로드캐스트 송신 워커
pub struct ChunkSender {
    store: Arc<ChunkStore>,
    state: Mutex<SendQueue>,
    notify: Notify,
}

impl ChunkSender {
    pub fn new(store: Arc<ChunkStore>) -> Self {
        Self {
            store,
            state: Mutex::new(SendQueue::default()),
            notify: Notify::new(),
        }
    }

    /// 송신 요청을 큐에 넣는다. 동일 튜플이 이미 대기 중이면 무시한다.
    pub fn enqueue(&self, hash: Sha224, start: u32, length: u32, dest: Ipv4Addr) {
        let entry = (hash, start, length, dest);
        {
            let mut state = self.state.lock();
            if !state.enqueued.insert(entry) {
                return;
            }
            state.queue.push_back(entry);
        }
        self.notify.notify_one();
    }

    /// 대기 중인 요청 수
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn pop(&self) -> Option<QueueEntry> {
        let mut state = self.state.lock();
        let entry = state.queue.pop_front()?;
        state.enqueued.remove(&entry);
        Some(entry)
    }

    /// 큐를 소진하는 워커 루프. 소켓은 브로드캐스트가 허용되어 있어야 한다.
    pub async fn run(&self, socket: &UdpSocket) {
        loop {
            match self.pop() {
                Some((hash, start, length, dest)) => {
                    let dest = SocketAddr::V4(SocketAddrV4::new(dest, CLIENT_PORT));
                    self.send_burst(socket, hash, start, length, dest).await;
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// 요청 범위를 데이터 패킷들로 단편화해 송신한다
    async fn send_burst(
        &self,
        socket: &UdpSocket,
        hash: Sha224,
        mut start: u32,
        mut length: u32,
        dest: SocketAddr,
    ) {
        let data = match self.store.fetch(&hash) {
            Ok(data) => data,
            Err(e) => {
                warn!("알 수 없는 청크 요청: {}", e);
                return;
            }
        };
        debug!("송신: {} [{}, {}) -> {}", hash, start, start + length, dest);
        while length > 0 {
            // 요청 범위를 실제 청크 크기로 절단한다
            let remaining = data.len().saturating_sub(start as usize);
            let take = (length as usize).min(MAX_DATA_SIZE).min(remaining);
            if take == 0 {
                break;
            }
            let packet = DataPacket {
                offset: start,
                chunk: hash,
                data: Bytes::copy_from_slice(&data[start as usize..start as usize + take]),
            };
            // 송신 실패는 버스트를 중단시키지 않는다. 재전송 타이머가 복구한다.
            if let Err(e) = socket.send_to(&packet.to_bytes(), dest).await {
                warn!("송신 실패: {}", e);
            }
            start += take as u32;
            length -= take as u32;
        }
    }
}
