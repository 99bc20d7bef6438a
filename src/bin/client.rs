//! pixie 클라이언트
//!
//! 구성 다이제스트로 매니페스트를 부트스트랩한 뒤, 디스크에 아직 없는
//! 청크를 전부 내려받아 대상 파일에 기록한다.
//!
//! 사용법:
//!   client <server_ip> <image_hash>

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pixie::{
    Chunk, ChunkListInfo, ChunkListRequest, Image, Manifest, Receiver, Sha224, CLIENT_PORT,
    CLIENT_TIMEOUT, SERVER_PORT,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("사용법: {} <server_ip> <image_hash>", args[0]);
        std::process::exit(1);
    }
    let server_ip: Ipv4Addr = match args[1].parse() {
        Ok(ip) => ip,
        Err(_) => {
            eprintln!("유효하지 않은 서버 주소: {}", args[1]);
            std::process::exit(1);
        }
    };
    let config_hash = match Sha224::from_hex(&args[2]) {
        Ok(hash) => hash,
        Err(e) => {
            eprintln!("유효하지 않은 이미지 해시: {e}");
            std::process::exit(1);
        }
    };

    info!("pixie client starting...");
    info!("Server: {}, image digest: {}", server_ip, config_hash);

    // 응답이 유실되지 않도록 수신 소켓을 먼저 바인드한 뒤 요청을 보낸다
    let listen = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, CLIENT_PORT)).await?);
    let answer = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?);
    answer.connect((server_ip, SERVER_PORT)).await?;

    let info = bootstrap(&listen, &answer, config_hash).await?;
    info!("Manifest: {} ({} bytes)", info.hash, info.length);

    let receiver = Receiver::start(listen, answer);

    // 매니페스트 자체를 첫 청크로 내려받는다
    let manifest_chunk = Chunk {
        hash: info.hash,
        offset: 0,
        size: info.length,
    };
    receiver.set_interesting(&manifest_chunk).await;
    while receiver.count() > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let (_, manifest_bytes) = receiver
        .get_complete_chunk()
        .ok_or("매니페스트 수신 실패")?;
    let manifest = Manifest::parse(&manifest_bytes)?;
    info!("Manifest parsed: {} files", manifest.entries().len());

    let image = Image::open(&manifest)?;
    let missing = image.missing_chunks()?;
    info!("Missing chunks: {}", missing.len());
    for chunk in &missing {
        receiver.set_interesting(chunk).await;
    }

    let mut remaining = missing.len();
    let mut last_progress = Instant::now();
    while remaining > 0 {
        match receiver.get_complete_chunk() {
            Some((hash, data)) => {
                image.write_chunk(&hash, &data)?;
                remaining -= 1;
                debug!("청크 기록: {} ({} 바이트)", hash, data.len());
            }
            None => tokio::time::sleep(Duration::from_millis(1)).await,
        }
        if last_progress.elapsed() > Duration::from_secs(2) {
            info!("Progress: {}/{} chunks", missing.len() - remaining, missing.len());
            last_progress = Instant::now();
        }
    }

    receiver.stop().await;
    info!("Download complete: {}", receiver.stats().summary());
    Ok(())
}

/// 구성 다이제스트로 매니페스트의 (길이, 다이제스트)를 묻는다
///
/// 응답은 서버의 응답 소켓에서 유니캐스트로 클라이언트 수신 포트에
/// 도착한다. 타임아웃마다 요청을 다시 보낸다.
async fn bootstrap(
    listen: &UdpSocket,
    answer: &UdpSocket,
    config_hash: Sha224,
) -> Result<ChunkListInfo, Box<dyn std::error::Error>> {
    let request = ChunkListRequest { hash: config_hash }.to_bytes();
    answer.send(&request).await?;
    let mut last_request = Instant::now();
    let mut buf = [0u8; 2048];
    loop {
        if last_request.elapsed() > CLIENT_TIMEOUT {
            last_request = Instant::now();
            debug!("매니페스트 정보 재요청");
            answer.send(&request).await?;
        }
        match tokio::time::timeout(Duration::from_millis(10), listen.recv(&mut buf)).await {
            Ok(Ok(len)) => {
                if let Some(info) = ChunkListInfo::from_bytes(&buf[..len]) {
                    return Ok(info);
                }
                warn!("예상치 못한 패킷 수신 ({}바이트)", len);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {} // 타임아웃, 계속
        }
    }
}
