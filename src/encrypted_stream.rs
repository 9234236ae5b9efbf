/* This file is part of covertun.
 *
 * covertun is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * covertun is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with covertun.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::cipher::Cipher;
use crate::error::{Result, TunnelError};

/// Largest total record body (IV + ciphertext) this stream will accept or
/// produce. Also the size of the decrypted-record scratch buffer, since a
/// record's plaintext can never exceed its own wire length.
pub const MAX_PAYLOAD: usize = 64 * 1024;

const IV_SIZE: usize = 16;
const MAX_PAD: usize = 16;
/// Largest plaintext chunk written as a single record; writes above this
/// are clamped (a legitimate short write) so that `IV + padded_len` never
/// exceeds `MAX_PAYLOAD`.
const MAX_WRITE_CHUNK: usize = MAX_PAYLOAD - IV_SIZE - MAX_PAD;

/// Length-framed, AES-CBC-encrypted wrapper around an owned `TcpStream`.
/// Implements ordinary read/write semantics (partial reads, short writes)
/// so the splice engine can treat it like any other byte stream.
pub struct EncryptedStream {
    stream: TcpStream,
    cipher: Arc<Cipher>,
    read_scratch: Vec<u8>,
    leftover_start: usize,
    leftover_end: usize,
}

impl EncryptedStream {
    pub fn new(stream: TcpStream, cipher: Arc<Cipher>) -> Self {
        EncryptedStream {
            stream,
            cipher,
            read_scratch: vec![0u8; MAX_PAYLOAD],
            leftover_start: 0,
            leftover_end: 0,
        }
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }

    /// Splits into independent read/write halves sharing the same cipher,
    /// so the two splice directions can each own one half exclusively.
    pub fn split(self) -> (EncryptedReadHalf, EncryptedWriteHalf) {
        let (read_half, write_half) = self.stream.into_split();
        let reader = EncryptedReadHalf {
            stream: read_half,
            cipher: self.cipher.clone(),
            read_scratch: self.read_scratch,
            leftover_start: self.leftover_start,
            leftover_end: self.leftover_end,
        };
        let writer = EncryptedWriteHalf {
            stream: write_half,
            cipher: self.cipher,
        };
        (reader, writer)
    }

    /// Writes one record carrying up to `MAX_WRITE_CHUNK` bytes of `buf`,
    /// returning the plaintext byte count actually consumed (the caller
    /// must retry with the remainder, exactly as a short socket write).
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        write_record(&mut self.stream, &self.cipher, buf).await
    }

    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Delivers buffered `leftover` bytes first; only touches the wire once
    /// `leftover` is exhausted. Returns `Ok(0)` on a clean end-of-stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        read_record(
            &mut self.stream, &self.cipher, &mut self.read_scratch,
            &mut self.leftover_start, &mut self.leftover_end, buf,
        ).await
    }
}

pub struct EncryptedReadHalf {
    stream: OwnedReadHalf,
    cipher: Arc<Cipher>,
    read_scratch: Vec<u8>,
    leftover_start: usize,
    leftover_end: usize,
}

impl EncryptedReadHalf {
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        read_record(
            &mut self.stream, &self.cipher, &mut self.read_scratch,
            &mut self.leftover_start, &mut self.leftover_end, buf,
        ).await
    }
}

pub struct EncryptedWriteHalf {
    stream: OwnedWriteHalf,
    cipher: Arc<Cipher>,
}

impl EncryptedWriteHalf {
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        write_record(&mut self.stream, &self.cipher, buf).await
    }

    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

async fn write_record<W>(stream: &mut W, cipher: &Cipher, buf: &[u8]) -> Result<usize>
    where W: tokio::io::AsyncWrite + Unpin
{
    let n = buf.len().min(MAX_WRITE_CHUNK);
    let ct = cipher.encrypt(&buf[..n]);

    // The length prefix and body are assembled into one buffer and issued
    // as a single write_all call: a partial write of just the prefix would
    // leave the peer unable to ever resynchronize on record boundaries.
    let mut frame = Vec::with_capacity(4 + ct.len());
    frame.extend_from_slice(&(ct.len() as u32).to_be_bytes());
    frame.extend_from_slice(&ct);
    stream.write_all(&frame).await?;
    Ok(n)
}

async fn read_record<R>(
    stream: &mut R,
    cipher: &Cipher,
    read_scratch: &mut [u8],
    leftover_start: &mut usize,
    leftover_end: &mut usize,
    buf: &mut [u8],
) -> Result<usize>
    where R: tokio::io::AsyncRead + Unpin
{
    if *leftover_start < *leftover_end {
        let avail = *leftover_end - *leftover_start;
        let n = buf.len().min(avail);
        buf[..n].copy_from_slice(&read_scratch[*leftover_start..*leftover_start + n]);
        *leftover_start += n;
        return Ok(n);
    }

    let mut len_buf = [0u8; 4];
    let first = stream.read(&mut len_buf[..1]).await?;
    if first == 0 {
        return Ok(0);
    }
    stream.read_exact(&mut len_buf[1..]).await
        .map_err(|_| TunnelError::UnexpectedEof)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len < 32 || len > MAX_PAYLOAD || len % 16 != 0 {
        return Err(TunnelError::MalformedRecord(format!("record length {len} out of range")));
    }

    let mut ct = vec![0u8; len];
    stream.read_exact(&mut ct).await.map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            TunnelError::UnexpectedEof
        } else {
            TunnelError::Io(err)
        }
    })?;

    let pt = cipher.decrypt(&ct)?;
    let p = pt.len();
    read_scratch[..p].copy_from_slice(&pt);

    if p <= buf.len() {
        buf[..p].copy_from_slice(&read_scratch[..p]);
        *leftover_start = 0;
        *leftover_end = 0;
        Ok(p)
    } else {
        buf.copy_from_slice(&read_scratch[..buf.len()]);
        *leftover_start = buf.len();
        *leftover_end = p;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::Method;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let (client, (server, _)) = tokio::join!(client, listener.accept());
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn round_trips_arbitrary_chunking() {
        let (a, b) = connected_pair().await;
        let cipher = Arc::new(Cipher::new(Method::Aes, "secret"));

        let mut writer = EncryptedStream::new(a, cipher.clone());
        let mut reader = EncryptedStream::new(b, cipher);

        let payload = vec![0x5Au8; 100_000];
        let payload_clone = payload.clone();
        let writer_task = tokio::spawn(async move {
            writer.write_all(&payload_clone).await.unwrap();
        });

        let mut received = Vec::new();
        let mut chunk = [0u8; 17]; // deliberately awkward read size
        while received.len() < payload.len() {
            let n = reader.read(&mut chunk).await.unwrap();
            assert!(n > 0, "reader saw EOF before full payload arrived");
            received.extend_from_slice(&chunk[..n]);
        }
        writer_task.await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn malformed_record_length_fails_closed() {
        let (mut a, b) = connected_pair().await;
        let cipher = Arc::new(Cipher::new(Method::Aes, "secret"));
        let mut reader = EncryptedStream::new(b, cipher);

        a.write_all(&17u32.to_be_bytes()).await.unwrap();
        let err = reader.read(&mut [0u8; 16]).await.unwrap_err();
        assert!(matches!(err, TunnelError::MalformedRecord(_)));
    }

    #[tokio::test]
    async fn clean_close_before_any_bytes_is_eof() {
        let (a, b) = connected_pair().await;
        drop(a);
        let cipher = Arc::new(Cipher::new(Method::Aes, "secret"));
        let mut reader = EncryptedStream::new(b, cipher);
        assert_eq!(reader.read(&mut [0u8; 16]).await.unwrap(), 0);
    }
}
