//! 요청 디멀티플렉서 (서버측)
//!
//! 잘 알려진 포트에서 단일 수신 루프를 돌린다. 메시지 종류로 라우팅만
//! 할 뿐 뒷받침 파일 I/O는 하지 않는다. 잘못된 패킷은 로그 후 폐기하며
//! 루프는 결코 중단되지 않는다.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::broadcast::BroadcastChooser;
use crate::message::{self, ChunkListInfo, ChunkListRequest, DataRequest};
use crate::sender::ChunkSender;
use crate::store::ChunkStore;
use crate::CLIENT_PORT;

/// UDP 요청 라우터
pub struct Server {
    store: Arc<ChunkStore>,
    sender: Arc<ChunkSender>,
    chooser: BroadcastChooser,
}

impl Server {
    pub fn new(store: Arc<ChunkStore>, sender: Arc<ChunkSender>, chooser: BroadcastChooser) -> Self {
        Self {
            store,
            sender,
            chooser,
        }
    }

    /// 수신 루프. `listen`으로 요청을 받고 `answer`로 유니캐스트 응답을 보낸다.
    pub async fn run(&self, listen: &UdpSocket, answer: &UdpSocket) {
        let mut buf = [0u8; 2048];
        loop {
            let (len, peer) = match listen.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    continue;
                }
            };
            self.handle_packet(&buf[..len], peer, answer).await;
        }
    }

    async fn handle_packet(&self, data: &[u8], peer: SocketAddr, answer: &UdpSocket) {
        match message::message_type(data) {
            Some(message::CHUNK_LIST_REQUEST) => {
                let Some(request) = ChunkListRequest::from_bytes(data) else {
                    warn!("잘못된 청크 목록 요청 ({}바이트, {})", data.len(), peer);
                    return;
                };
                let Some((length, hash)) = self.store.manifest_info(&request.hash) else {
                    warn!("알 수 없는 청크 목록 요청: {}", request.hash);
                    return;
                };
                // 응답은 요청의 출발 포트가 아니라 클라이언트 수신 포트로 간다
                let dest = SocketAddr::new(peer.ip(), CLIENT_PORT);
                debug!("청크 목록 응답: {} ({} 바이트) -> {}", hash, length, dest);
                let info = ChunkListInfo { length, hash };
                if let Err(e) = answer.send_to(&info.to_bytes(), dest).await {
                    warn!("송신 실패: {}", e);
                }
            }
            Some(message::DATA_REQUEST) => {
                let Some(request) = DataRequest::from_bytes(data) else {
                    warn!("잘못된 데이터 요청 ({}바이트, {})", data.len(), peer);
                    return;
                };
                let IpAddr::V4(client) = peer.ip() else {
                    warn!("IPv4가 아닌 클라이언트: {}", peer);
                    return;
                };
                match self.chooser.resolve(client) {
                    Ok(bcast) => {
                        self.sender
                            .enqueue(request.chunk, request.start, request.length, bcast)
                    }
                    Err(e) => warn!("오프링크 클라이언트 거부: {}", e),
                }
            }
            _ => warn!("알 수 없는 메시지 수신 ({}바이트, {})", data.len(), peer),
        }
    }
}
