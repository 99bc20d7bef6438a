//! 청크 재조립기 (클라이언트측)
//!
//! - 관심 청크마다 전 범위 데이터 요청을 보내고 브로드캐스트를 수신
//! - 바이트 단위 누락 비트맵으로 중복 수신과 순서 역전을 흡수
//! - 수신 완료 시 SHA-224 검증 후 완료 큐로 전달
//! - 타임아웃이 지나면 부분 상태를 버리고 전체 범위를 재요청
//!
//! LAN에서 지배적인 장애는 손상이 아니라 패킷 손실이다. 조용한 구간
//! 뒤의 가장 단순한 복구는 청크 전체를 다시 묻는 것이다. 응답은
//! 브로드캐스트이므로 같은 청크를 기다리는 다른 클라이언트도 득을 본다.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::file::Chunk;
use crate::hash::Sha224;
use crate::message::{self, DataPacket, DataRequest};
use crate::stats::TransferStats;
use crate::CLIENT_TIMEOUT;

/// 바이트 단위 누락 비트맵 (비트 1 = 아직 수신되지 않음)
///
/// 남은 비트 수를 따로 세어 완료 판정을 O(1)로 만든다. 카운터는 항상
/// 비트맵의 1 비트 수와 같다.
struct MissingMap {
    words: Vec<u64>,
    remaining: u32,
}

impl MissingMap {
    fn new(size: u32) -> Self {
        let nwords = (size as usize + 63) / 64;
        let mut words = vec![u64::MAX; nwords];
        let tail = size as usize % 64;
        if tail != 0 {
            words[nwords - 1] = (1u64 << tail) - 1;
        }
        Self {
            words,
            remaining: size,
        }
    }

    /// 비트를 0으로 만든다. 이전 값이 1이었으면 true.
    fn clear(&mut self, i: u32) -> bool {
        let mask = 1u64 << (i % 64);
        let word = &mut self.words[(i / 64) as usize];
        if *word & mask != 0 {
            *word &= !mask;
            self.remaining -= 1;
            true
        } else {
            false
        }
    }

    fn remaining(&self) -> u32 {
        self.remaining
    }

    #[cfg(test)]
    fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

/// 진행 중 재조립 하나. 버퍼와 비트맵을 배타적으로 소유한다.
struct Reassembly {
    data: Vec<u8>,
    missing: MissingMap,
}

/// 호출자와 공유하는 상태 (큐 뮤텍스 아래)
#[derive(Default)]
struct Shared {
    /// 다이제스트 -> 기대 크기. 내려받기로 결정한 순간부터 검증이 끝날
    /// 때까지 들어 있다.
    interesting: HashMap<Sha224, u32>,

    /// 완료 큐 (완료 순서, 요청 순서가 아니다)
    complete: VecDeque<(Sha224, Vec<u8>)>,
}

/// 데이터 요청 송신부. 송신 뮤텍스로 직렬화한다.
#[derive(Clone)]
struct Requester {
    socket: Arc<UdpSocket>,
    lock: Arc<AsyncMutex<()>>,
}

impl Requester {
    async fn request(&self, hash: Sha224, start: u32, length: u32) {
        let request = DataRequest {
            start,
            length,
            chunk: hash,
        };
        let _guard = self.lock.lock().await;
        if let Err(e) = self.socket.send(&request.to_bytes()).await {
            warn!("요청 송신 실패: {}", e);
        }
    }
}

enum ReceiverCmd {
    /// 수신된 데이터 패킷
    Packet(DataPacket),
    /// 새 관심 청크 (재전송 테이블에 시드)
    Watch(Sha224),
    /// 주기적 타임아웃 점검
    Tick,
    Stop,
}

/// 워커 태스크의 내부 상태. 진행 중 맵과 재전송 테이블은 워커만 만지므로
/// 잠금이 필요 없다.
struct Worker {
    shared: Arc<Mutex<Shared>>,
    in_progress: HashMap<Sha224, Reassembly>,
    /// (마지막 패킷 시각, 다이제스트) 순서. 먼저 만료될 항목이 앞에 온다.
    expiry: BTreeSet<(Instant, Sha224)>,
    last_packet: HashMap<Sha224, Instant>,
    requester: Requester,
    stats: Arc<Mutex<TransferStats>>,
}

impl Worker {
    fn touch(&mut self, hash: Sha224, now: Instant) {
        if let Some(prev) = self.last_packet.insert(hash, now) {
            self.expiry.remove(&(prev, hash));
        }
        self.expiry.insert((now, hash));
    }

    fn forget(&mut self, hash: &Sha224) {
        if let Some(prev) = self.last_packet.remove(hash) {
            self.expiry.remove(&(prev, *hash));
        }
    }

    fn handle_packet(&mut self, packet: DataPacket) {
        let hash = packet.chunk;
        let expected = {
            let shared = self.shared.lock();
            match shared.interesting.get(&hash) {
                Some(&size) => size,
                // 완료됐거나 애초에 관심 밖인 청크
                None => return,
            }
        };
        let end = packet.offset as u64 + packet.data.len() as u64;
        if end > expected as u64 {
            warn!(
                "범위를 벗어난 패킷: {} [{}, {}) (기대 크기 {})",
                hash, packet.offset, end, expected
            );
            return;
        }

        self.touch(hash, Instant::now());

        let reassembly = self.in_progress.entry(hash).or_insert_with(|| Reassembly {
            data: vec![0; expected as usize],
            missing: MissingMap::new(expected),
        });

        let mut duplicates = 0u64;
        let mut conflicts = 0u64;
        for (i, &byte) in packet.data.iter().enumerate() {
            let at = packet.offset as usize + i;
            if reassembly.missing.clear(at as u32) {
                reassembly.data[at] = byte;
            } else {
                duplicates += 1;
                if reassembly.data[at] != byte {
                    // 서버가 일관되지 않다. 복구는 없고 새 값을 덮어쓴다.
                    conflicts += 1;
                    reassembly.data[at] = byte;
                }
            }
        }
        if conflicts > 0 {
            warn!("상충하는 데이터 수신: {} ({}바이트)", hash, conflicts);
        }

        let complete = reassembly.missing.remaining() == 0;
        {
            let mut stats = self.stats.lock();
            stats.packets += 1;
            stats.duplicate_bytes += duplicates;
            stats.conflicts += conflicts;
        }

        if complete {
            if let Some(reassembly) = self.in_progress.remove(&hash) {
                self.finish(hash, reassembly.data);
            }
        }
    }

    fn finish(&mut self, hash: Sha224, data: Vec<u8>) {
        let actual = Sha224::digest(&data);
        if actual != hash {
            // 버퍼만 버린다. 관심 항목이 남아 있으므로 타임아웃이 재요청한다.
            warn!("해시 불일치: 기대 {}, 실제 {}", hash, actual);
            self.stats.lock().hash_failures += 1;
            return;
        }
        self.forget(&hash);
        debug!("청크 완료: {} ({} 바이트)", hash, data.len());
        let mut stats = self.stats.lock();
        stats.completed_chunks += 1;
        stats.total_bytes += data.len() as u64;
        drop(stats);

        let mut shared = self.shared.lock();
        shared.interesting.remove(&hash);
        shared.complete.push_back((hash, data));
    }

    /// 만료된 항목들을 앞에서부터 걷어내며 전체 범위를 재요청한다
    async fn check_timeouts(&mut self) {
        let now = Instant::now();
        loop {
            let Some(&(last, hash)) = self.expiry.iter().next() else {
                break;
            };
            if last + CLIENT_TIMEOUT >= now {
                break;
            }
            self.expiry.remove(&(last, hash));
            self.last_packet.remove(&hash);
            // 부분 상태는 버린다. 재요청 응답이 순서대로 다시 채운다.
            self.in_progress.remove(&hash);

            let expected = self.shared.lock().interesting.get(&hash).copied();
            let Some(size) = expected else {
                continue;
            };
            debug!("타임아웃, 재요청: {} ({} 바이트)", hash, size);
            // 재요청 자체가 유실돼도 다음 타임아웃에 다시 시도하도록
            // 테이블에 도로 넣는다
            self.touch(hash, now);
            self.stats.lock().rerequests += 1;
            self.requester.request(hash, 0, size).await;
        }
    }
}

/// 재조립기 핸들 (외부 제어용)
pub struct Receiver {
    shared: Arc<Mutex<Shared>>,
    requester: Requester,
    cmd_tx: mpsc::Sender<ReceiverCmd>,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<TransferStats>>,
}

impl Receiver {
    /// 재조립기를 시작한다
    ///
    /// `listen`은 브로드캐스트를 받는 클라이언트 포트에 바인드된 소켓,
    /// `answer`는 서버로 connect된 소켓이어야 한다.
    pub fn start(listen: Arc<UdpSocket>, answer: Arc<UdpSocket>) -> Self {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let stats = Arc::new(Mutex::new(TransferStats::default()));
        let running = Arc::new(AtomicBool::new(true));
        let requester = Requester {
            socket: answer,
            lock: Arc::new(AsyncMutex::new(())),
        };
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ReceiverCmd>(1024);

        // 수신 태스크: 짧은 타임아웃으로 폴링해 정지 플래그를 놓치지 않는다
        let running_recv = running.clone();
        let packet_tx = cmd_tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            while running_recv.load(Ordering::SeqCst) {
                match tokio::time::timeout(Duration::from_millis(10), listen.recv_from(&mut buf))
                    .await
                {
                    Ok(Ok((len, _))) => {
                        let data = &buf[..len];
                        if message::message_type(data) != Some(message::DATA_PACKET) {
                            debug!("알 수 없는 패킷 수신 ({}바이트)", len);
                            continue;
                        }
                        match DataPacket::from_bytes(data) {
                            Some(packet) => {
                                if packet_tx.send(ReceiverCmd::Packet(packet)).await.is_err() {
                                    break;
                                }
                            }
                            None => warn!("잘못된 데이터 패킷 ({}바이트)", len),
                        }
                    }
                    Ok(Err(e)) => warn!("수신 에러: {}", e),
                    Err(_) => {} // 타임아웃, 계속
                }
            }
        });

        // 타이머 태스크: 재전송 점검 주기
        let running_tick = running.clone();
        let tick_tx = cmd_tx.clone();
        tokio::spawn(async move {
            while running_tick.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(500)).await;
                if tick_tx.send(ReceiverCmd::Tick).await.is_err() {
                    break;
                }
            }
        });

        // 워커 태스크
        let mut worker = Worker {
            shared: shared.clone(),
            in_progress: HashMap::new(),
            expiry: BTreeSet::new(),
            last_packet: HashMap::new(),
            requester: requester.clone(),
            stats: stats.clone(),
        };
        let running_main = running.clone();
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    ReceiverCmd::Packet(packet) => worker.handle_packet(packet),
                    ReceiverCmd::Watch(hash) => worker.touch(hash, Instant::now()),
                    ReceiverCmd::Tick => worker.check_timeouts().await,
                    ReceiverCmd::Stop => break,
                }
            }
            running_main.store(false, Ordering::SeqCst);
        });

        Self {
            shared,
            requester,
            cmd_tx,
            running,
            stats,
        }
    }

    /// 청크를 관심 목록에 넣고 즉시 전 범위를 요청한다
    pub async fn set_interesting(&self, chunk: &Chunk) {
        self.shared.lock().interesting.insert(chunk.hash, chunk.size);
        let _ = self.cmd_tx.send(ReceiverCmd::Watch(chunk.hash)).await;
        self.requester.request(chunk.hash, 0, chunk.size).await;
    }

    /// 아직 완료되지 않은 관심 청크 수
    pub fn count(&self) -> usize {
        self.shared.lock().interesting.len()
    }

    /// 완료 큐에서 하나를 꺼낸다
    pub fn get_complete_chunk(&self) -> Option<(Sha224, Vec<u8>)> {
        self.shared.lock().complete.pop_front()
    }

    /// 워커 정지. 진행 중 버퍼는 버려지고 완료 큐는 남는다.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(ReceiverCmd::Stop).await;
    }

    /// 현재 통계 스냅숏
    pub fn stats(&self) -> TransferStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_missing_map_coherence() {
        let mut map = MissingMap::new(3000);
        assert_eq!(map.remaining(), 3000);
        assert_eq!(map.count_ones(), 3000);

        assert!(map.clear(0));
        assert!(!map.clear(0));
        assert!(map.clear(2999));
        assert_eq!(map.remaining(), 2998);
        assert_eq!(map.remaining(), map.count_ones());

        for i in 0..3000 {
            map.clear(i);
            assert_eq!(map.remaining(), map.count_ones());
        }
        assert_eq!(map.remaining(), 0);
    }

    #[test]
    fn test_missing_map_tail_word() {
        // 64의 배수가 아닌 크기는 마지막 워드의 바깥 비트를 세면 안 된다
        let map = MissingMap::new(65);
        assert_eq!(map.count_ones(), 65);
        assert_eq!(MissingMap::new(64).count_ones(), 64);
        assert_eq!(MissingMap::new(1).count_ones(), 1);
    }

    async fn test_worker() -> (Worker, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer.local_addr().unwrap()).await.unwrap();
        let worker = Worker {
            shared: Arc::new(Mutex::new(Shared::default())),
            in_progress: HashMap::new(),
            expiry: BTreeSet::new(),
            last_packet: HashMap::new(),
            requester: Requester {
                socket: Arc::new(socket),
                lock: Arc::new(AsyncMutex::new(())),
            },
            stats: Arc::new(Mutex::new(TransferStats::default())),
        };
        (worker, peer)
    }

    fn fragments(content: &[u8], hash: Sha224) -> Vec<DataPacket> {
        content
            .chunks(1400)
            .enumerate()
            .map(|(i, part)| DataPacket {
                offset: (i * 1400) as u32,
                chunk: hash,
                data: Bytes::copy_from_slice(part),
            })
            .collect()
    }

    fn watch(worker: &mut Worker, hash: Sha224, size: u32) {
        worker.shared.lock().interesting.insert(hash, size);
        worker.touch(hash, Instant::now());
    }

    #[tokio::test]
    async fn test_in_order_reassembly() {
        let (mut worker, _peer) = test_worker().await;
        let content = vec![0u8; 3000];
        let hash = Sha224::digest(&content);
        watch(&mut worker, hash, 3000);

        let packets = fragments(&content, hash);
        worker.handle_packet(packets[0].clone());
        assert_eq!(worker.in_progress[&hash].missing.remaining(), 1600);
        worker.handle_packet(packets[1].clone());
        assert_eq!(worker.in_progress[&hash].missing.remaining(), 200);
        worker.handle_packet(packets[2].clone());

        assert!(worker.in_progress.is_empty());
        assert!(worker.expiry.is_empty());
        let mut shared = worker.shared.lock();
        assert!(shared.interesting.is_empty());
        let (done_hash, data) = shared.complete.pop_front().unwrap();
        assert_eq!(done_hash, hash);
        assert_eq!(data, content);
    }

    #[tokio::test]
    async fn test_reordered_reassembly() {
        let (mut worker, _peer) = test_worker().await;
        let content: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
        let hash = Sha224::digest(&content);
        watch(&mut worker, hash, 3000);

        let packets = fragments(&content, hash);
        for i in [2, 0, 1] {
            let reassembly = worker.in_progress.get(&hash);
            if let Some(r) = reassembly {
                assert_eq!(r.missing.remaining(), r.missing.count_ones());
            }
            worker.handle_packet(packets[i].clone());
        }

        let (_, data) = worker.shared.lock().complete.pop_front().unwrap();
        assert_eq!(data, content);
    }

    #[tokio::test]
    async fn test_duplicate_packets_idempotent() {
        let (mut worker, _peer) = test_worker().await;
        let content: Vec<u8> = (0..3000).map(|i| (i % 13) as u8).collect();
        let hash = Sha224::digest(&content);
        watch(&mut worker, hash, 3000);

        let packets = fragments(&content, hash);
        worker.handle_packet(packets[0].clone());
        worker.handle_packet(packets[0].clone());
        let reassembly = &worker.in_progress[&hash];
        assert_eq!(reassembly.missing.remaining(), 1600);
        assert_eq!(reassembly.missing.remaining(), reassembly.missing.count_ones());
        assert_eq!(worker.stats.lock().duplicate_bytes, 1400);
        assert_eq!(worker.stats.lock().conflicts, 0);

        worker.handle_packet(packets[1].clone());
        worker.handle_packet(packets[2].clone());
        let (_, data) = worker.shared.lock().complete.pop_front().unwrap();
        assert_eq!(data, content);
    }

    #[tokio::test]
    async fn test_conflicting_duplicate_logged_and_overwritten() {
        let (mut worker, _peer) = test_worker().await;
        let hash = Sha224::digest(b"whatever");
        watch(&mut worker, hash, 4);

        worker.handle_packet(DataPacket {
            offset: 0,
            chunk: hash,
            data: Bytes::from_static(&[1, 2]),
        });
        worker.handle_packet(DataPacket {
            offset: 0,
            chunk: hash,
            data: Bytes::from_static(&[9, 2]),
        });

        let reassembly = &worker.in_progress[&hash];
        assert_eq!(reassembly.data[0], 9);
        assert_eq!(reassembly.missing.remaining(), 2);
        assert_eq!(worker.stats.lock().conflicts, 1);
        assert_eq!(worker.stats.lock().duplicate_bytes, 2);
    }

    #[tokio::test]
    async fn test_hash_mismatch_keeps_interesting() {
        let (mut worker, _peer) = test_worker().await;
        let hash = Sha224::digest(b"ABC");
        watch(&mut worker, hash, 3);

        // 손상된 페이로드: 카운터는 0이 되지만 검증에 실패한다
        worker.handle_packet(DataPacket {
            offset: 0,
            chunk: hash,
            data: Bytes::from_static(b"ABD"),
        });
        assert!(worker.in_progress.is_empty());
        assert!(worker.shared.lock().complete.is_empty());
        assert!(worker.shared.lock().interesting.contains_key(&hash));
        assert_eq!(worker.stats.lock().hash_failures, 1);
        // 재전송 테이블에는 남아 있어 타임아웃이 재요청하게 된다
        assert!(worker.last_packet.contains_key(&hash));

        // 손상 없는 두 번째 시도는 성공한다
        worker.handle_packet(DataPacket {
            offset: 0,
            chunk: hash,
            data: Bytes::from_static(b"ABC"),
        });
        let (done, data) = worker.shared.lock().complete.pop_front().unwrap();
        assert_eq!(done, hash);
        assert_eq!(data, b"ABC");
    }

    #[tokio::test]
    async fn test_out_of_range_packet_rejected() {
        let (mut worker, _peer) = test_worker().await;
        let hash = Sha224::digest(b"small");
        watch(&mut worker, hash, 100);

        worker.handle_packet(DataPacket {
            offset: 90,
            chunk: hash,
            data: Bytes::from_static(&[0u8; 20]),
        });
        assert!(worker.in_progress.is_empty());

        // 관심 밖 다이제스트도 조용히 버려진다
        worker.handle_packet(DataPacket {
            offset: 0,
            chunk: Sha224::digest(b"other"),
            data: Bytes::from_static(&[1]),
        });
        assert!(worker.in_progress.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_rerequests_full_range() {
        let (mut worker, peer) = test_worker().await;
        let hash = Sha224::digest(b"slow");
        watch(&mut worker, hash, 50);

        // 진행 중 상태를 만들어 두고 마지막 패킷 시각을 과거로 돌린다
        worker.handle_packet(DataPacket {
            offset: 0,
            chunk: hash,
            data: Bytes::from_static(&[0u8; 10]),
        });
        assert!(worker.in_progress.contains_key(&hash));
        let past = Instant::now()
            .checked_sub(CLIENT_TIMEOUT + Duration::from_secs(1))
            .unwrap();
        worker.forget(&hash);
        worker.touch(hash, past);

        worker.check_timeouts().await;

        // 부분 상태는 버려지고 테이블에는 새 시각으로 되돌아간다
        assert!(worker.in_progress.is_empty());
        assert!(worker.last_packet[&hash] > past);
        assert_eq!(worker.stats.lock().rerequests, 1);

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let request = DataRequest::from_bytes(&buf[..len]).unwrap();
        assert_eq!(request.chunk, hash);
        assert_eq!((request.start, request.length), (0, 50));

        // 관심이 끊긴 다이제스트는 재요청 없이 테이블에서 사라진다
        worker.shared.lock().interesting.remove(&hash);
        worker.forget(&hash);
        worker.touch(hash, past);
        worker.check_timeouts().await;
        assert!(worker.expiry.is_empty());
        assert_eq!(worker.stats.lock().rerequests, 1);
    }
}
