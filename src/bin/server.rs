//! pixie 서버
//!
//! 구성 파일마다 이미지 파일들을 인덱싱해 콘텐츠 주소 인덱스를 만들고,
//! UDP 요청 디멀티플렉서 + 브로드캐스트 송신 워커 + iPXE 스크립트 HTTP
//! 서버를 돌린다.
//!
//! 사용법:
//!   server <config.json> [<config.json> ...]

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pixie::{config, BroadcastChooser, ChunkSender, HttpServer, Server, SERVER_PORT};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("사용법: {} <config.json> [<config.json> ...]", args[0]);
        std::process::exit(1);
    }

    info!("pixie server starting...");

    let configs = config::parse_configs(&args[1..])?;
    let mut store = pixie::ChunkStore::new();
    for config in &configs {
        store.add_config(config);
        info!(
            "Config loaded: {} files, digest {}",
            config.files().len(),
            config.config_hash()
        );
    }
    let store = Arc::new(store);
    info!("Serving {} file chunks", store.chunk_count());

    // HTTP 스크립트 서버 (바인드 실패는 기동 실패)
    let http_listener = tokio::net::TcpListener::bind(HttpServer::bind_addr()?).await?;
    let http = HttpServer::new(Arc::new(configs));
    tokio::spawn(async move {
        if let Err(e) = http.run(http_listener).await {
            warn!("HTTP 서버 종료: {}", e);
        }
    });

    // 송신 워커: 브로드캐스트 허용 소켓으로 큐를 소진한다
    let send_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    send_socket.set_broadcast(true)?;
    let sender = Arc::new(ChunkSender::new(store.clone()));
    let sender_worker = sender.clone();
    tokio::spawn(async move {
        sender_worker.run(&send_socket).await;
    });

    // 요청 디멀티플렉서
    let chooser = BroadcastChooser::discover()?;
    let listen = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, SERVER_PORT)).await?;
    let answer = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    info!("Listening on UDP port {}", SERVER_PORT);

    let server = Server::new(store, sender, chooser);
    server.run(&listen, &answer).await;
    Ok(())
}
