//! iPXE 부트 스크립트 HTTP 서비스
//!
//! `GET /<filename>?<client_ip>` 요청에 대해 클라이언트 IP가 속한 구성을
//! 찾아 iPXE 스크립트를 돌려준다. 스크립트의 커널 커맨드라인에는 구성
//! 다이제스트가 `pixie_sha224=`로 실려, 부팅된 시스템이 이미지를 끝까지
//! 검증할 수 있다.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::State;
use axum::http::Uri;
use axum::Router;
use tracing::{debug, info};

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::{DEFAULT_HTTP_ADDR, DEFAULT_HTTP_PORT};

/// 부트 이미지 전송 방식 (iPXE kernel/initrd URL 스킴)
const IMAGE_METHOD: &str = "tftp";

const UNKNOWN_HOST_SCRIPT: &str = "#!ipxe\necho Unknown host!\nshell\n";

/// 구성 목록을 읽기 전용으로 공유하는 스크립트 서버
pub struct HttpServer {
    configs: Arc<Vec<DownloadConfig>>,
}

impl HttpServer {
    pub fn new(configs: Arc<Vec<DownloadConfig>>) -> Self {
        Self { configs }
    }

    /// PIXIE_HTTP_ADDR / PIXIE_HTTP_PORT 환경변수로 바인드 주소를 정한다
    pub fn bind_addr() -> Result<SocketAddr> {
        let addr = std::env::var("PIXIE_HTTP_ADDR").unwrap_or_else(|_| DEFAULT_HTTP_ADDR.into());
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| Error::Config(format!("PIXIE_HTTP_ADDR 파싱 실패: {addr}")))?;
        let port = match std::env::var("PIXIE_HTTP_PORT") {
            Ok(port) => port
                .parse()
                .map_err(|_| Error::Config(format!("PIXIE_HTTP_PORT 파싱 실패: {port}")))?,
            Err(_) => DEFAULT_HTTP_PORT,
        };
        Ok(SocketAddr::new(addr, port))
    }

    /// 바인드된 리스너 위에서 HTTP 서비스를 돌린다 (종료하지 않는다)
    ///
    /// 바인드는 호출자가 한다. 바인드 실패는 기동 실패여야 하기 때문이다.
    pub async fn run(self, listener: tokio::net::TcpListener) -> Result<()> {
        let app = Router::new()
            .fallback(boot_script)
            .with_state(self.configs);
        if let Ok(addr) = listener.local_addr() {
            info!("HTTP 스크립트 서버 시작: {}", addr);
        }
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// URI 경로가 파일 이름, 쿼리 문자열 전체가 클라이언트 IP다
async fn boot_script(State(configs): State<Arc<Vec<DownloadConfig>>>, uri: Uri) -> String {
    debug!("스크립트 요청: {}", uri);
    let filename = uri.path().trim_start_matches('/');
    let client: Option<Ipv4Addr> = uri.query().and_then(|q| q.parse().ok());
    let config = client.and_then(|ip| configs.iter().find(|c| c.matches_address(ip)));
    match config {
        Some(config) => render_script(filename, config),
        None => UNKNOWN_HOST_SCRIPT.to_string(),
    }
}

fn render_script(filename: &str, config: &DownloadConfig) -> String {
    let mut script = String::from(
        "#!ipxe\n\n:retry\ndhcp && isset ${filename} || goto retry\n\
         echo Booting from ${filename}\nkernel ",
    );
    script.push_str(IMAGE_METHOD);
    script.push_str("://${next-server}//vmlinuz.img quiet pixie_server=${next-server} ip=");
    script.push_str(config.ip_method());
    script.push(' ');
    // "wipe-<인자>" 요청은 파티션 초기화 지시로 해석된다
    if filename.starts_with("wipe") {
        let arg = filename.get(5..).unwrap_or("");
        script.push_str(&format!("pixie_wipe={arg} "));
    }
    script.push_str(&format!("pixie_root_size={} ", config.root_size()));
    script.push_str(&format!("pixie_swap_size={} ", config.swap_size()));
    script.push_str(&format!("pixie_sha224={} ", config.config_hash()));
    script.push_str(config.extra_args());
    script.push_str(" || goto error\ninitrd ");
    script.push_str(IMAGE_METHOD);
    script.push_str("://${next-server}//initrd.img || goto error\nboot || goto error\nerror:\nshell");
    script
}
