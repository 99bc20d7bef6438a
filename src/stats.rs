//! 전송 통계

/// 재조립기 수신 통계
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// 수신한 데이터 패킷 수
    pub packets: u64,

    /// 완료(검증 통과)된 청크 수
    pub completed_chunks: u64,

    /// 완료된 청크의 바이트 합계
    pub total_bytes: u64,

    /// 중복 수신 바이트 수
    pub duplicate_bytes: u64,

    /// 상충한 바이트 수 (프로토콜 위반)
    pub conflicts: u64,

    /// 완료 시점 해시 불일치 횟수
    pub hash_failures: u64,

    /// 타임아웃 재요청 횟수
    pub rerequests: u64,
}

impl TransferStats {
    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Chunks: {} | Bytes: {} | Packets: {} | Dup bytes: {} | Re-requests: {} | Hash failures: {}",
            self.completed_chunks,
            self.total_bytes,
            self.packets,
            self.duplicate_bytes,
            self.rerequests,
            self.hash_failures,
        )
    }
}
