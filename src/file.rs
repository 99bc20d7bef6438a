//! 파일 인덱싱과 청크 I/O
//!
//! - `Chunk`: (다이제스트, 오프셋, 크기) 청크 기술자와 매니페스트 인코딩
//! - `InFile`: 서버측 읽기 전용 파일. 홀을 건너뛰며 청크 목록을 만든다
//! - `OutFile`: 클라이언트측 기록 대상 파일. 디스크에 이미 올바르게 있는
//!   청크를 판별해 다운로드를 멱등하게 만든다

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::sync::Arc;

use nix::libc;

use crate::error::Result;
use crate::hash::{Sha224, Sha224Hasher, DIGEST_LEN};

/// 청크 기술자
///
/// 와이어에서 쓰이는 청크의 정체성. 어느 파일이 뒷받침하는지는 서버측
/// 구현 세부 사항이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 청크 내용의 SHA-224
    pub hash: Sha224,

    /// 파일 내 바이트 오프셋
    pub offset: u64,

    /// 청크 크기 (바이트)
    pub size: u32,
}

impl Chunk {
    /// 매니페스트 항목 내 직렬화 크기 (다이제스트 28 + 오프셋 8 + 크기 4)
    pub const WIRE_SIZE: usize = DIGEST_LEN + 8 + 4;

    /// 매니페스트 인코딩 (다이제스트, 오프셋 be64, 크기 be32)
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(&self.offset.to_be_bytes());
        buf.extend_from_slice(&self.size.to_be_bytes());
    }

    /// 버퍼 선두 40바이트에서 디코딩
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        let mut hash = [0u8; DIGEST_LEN];
        hash.copy_from_slice(&buf[..DIGEST_LEN]);
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&buf[DIGEST_LEN..DIGEST_LEN + 8]);
        let mut size = [0u8; 4];
        size.copy_from_slice(&buf[DIGEST_LEN + 8..Self::WIRE_SIZE]);
        Some(Self {
            hash: Sha224::from_bytes(hash),
            offset: u64::from_be_bytes(offset),
            size: u32::from_be_bytes(size),
        })
    }

    /// 파일의 [start, end) 범위를 읽어 기술자를 만든다
    ///
    /// 읽은 바이트는 호출자의 해셔에도 누적되어, 파일 순서를 보존한 전체
    /// 다이제스트를 함께 계산할 수 있다.
    fn from_file(file: &File, start: u64, end: u64, global: &mut Sha224Hasher) -> Result<Self> {
        let mut data = vec![0u8; (end - start) as usize];
        file.read_exact_at(&mut data, start)?;
        global.update(&data);
        Ok(Self {
            hash: Sha224::digest(&data),
            offset: start,
            size: data.len() as u32,
        })
    }
}

fn seek(file: &File, offset: i64, whence: i32) -> io::Result<i64> {
    let pos = unsafe { libc::lseek(file.as_raw_fd(), offset, whence) };
    if pos == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(pos)
    }
}

/// 서버측 입력 파일
///
/// 열 때 한 번 스캔해 청크 목록을 만들고, 핸들은 이후의 청크 읽기를 위해
/// 유지한다. 복제본은 같은 핸들을 공유한다.
#[derive(Clone)]
pub struct InFile {
    file: Arc<File>,
    chunks: Vec<Chunk>,
}

impl InFile {
    /// 파일을 열고 할당된 구간만 청크로 인덱싱한다
    ///
    /// 데이터 구간 안에서는 마지막을 제외하고 정확히 `chunk_size` 바이트씩
    /// 자른다. 완전히 희소한 파일은 청크를 하나도 내지 않는다.
    pub fn open(
        path: impl AsRef<Path>,
        chunk_size: u32,
        global: &mut Sha224Hasher,
    ) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut chunks = Vec::new();
        let mut pos: u64 = 0;
        while pos < len {
            // 다음 홀까지가 현재 데이터 구간이다 (파일 끝도 홀로 취급된다)
            let next_hole = seek(&file, pos as i64, libc::SEEK_HOLE)? as u64;
            while pos < next_hole {
                let end = next_hole.min(pos + chunk_size as u64);
                chunks.push(Chunk::from_file(&file, pos, end, global)?);
                pos = end;
            }
            if next_hole >= len {
                break;
            }
            match seek(&file, next_hole as i64, libc::SEEK_DATA) {
                Ok(next_data) => pos = next_data as u64,
                // 마지막 데이터 구간 뒤로는 홀뿐이다
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Self {
            file: Arc::new(file),
            chunks,
        })
    }

    /// 인덱싱된 청크 목록
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// 청크의 전체 범위를 읽는다
    pub fn read_chunk(&self, chunk: &Chunk) -> Result<Vec<u8>> {
        let mut data = vec![0u8; chunk.size as usize];
        self.file.read_exact_at(&mut data, chunk.offset)?;
        Ok(data)
    }
}

/// 클라이언트측 출력 파일
pub struct OutFile {
    file: File,
    chunks: Vec<Chunk>,
}

impl OutFile {
    /// 기록 대상 파일을 연다 (없으면 0600으로 생성)
    pub fn create(path: impl AsRef<Path>, chunks: Vec<Chunk>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(path)?;
        Ok(Self { file, chunks })
    }

    /// 디스크 내용이 이미 기술자의 다이제스트와 일치하면 내려받지 않는다
    fn must_download(&self, chunk: &Chunk) -> Result<bool> {
        let mut data = vec![0u8; chunk.size as usize];
        match self.file.read_exact_at(&mut data, chunk.offset) {
            Ok(()) => Ok(Sha224::digest(&data) != chunk.hash),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// 아직 내려받아야 하는 청크 목록
    pub fn missing_chunks(&self) -> Result<Vec<Chunk>> {
        let mut missing = Vec::new();
        for chunk in &self.chunks {
            if self.must_download(chunk)? {
                missing.push(*chunk);
            }
        }
        Ok(missing)
    }

    /// 검증된 청크 바이트를 제자리에 기록한다
    pub fn write_chunk(&self, chunk: &Chunk, data: &[u8]) -> Result<()> {
        self.file.write_all_at(&data[..chunk.size as usize], chunk.offset)?;
        Ok(())
    }
}
