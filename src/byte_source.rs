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

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::encrypted_stream::{EncryptedReadHalf, EncryptedStream};
use crate::error::{Result, TunnelError};

/// A minimal byte source `SocksAddress::read_from` can parse off of,
/// implemented both for plain async sockets (the local SOCKS5 side) and
/// for the encrypted tunnel leg (the server reading a destination that may
/// be split across more than one wire record).
pub trait ByteSource {
    async fn read_u8(&mut self) -> Result<u8>;
    async fn read_u16(&mut self) -> Result<u16>;
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;
}

impl<T: AsyncRead + Unpin> ByteSource for T {
    async fn read_u8(&mut self) -> Result<u8> {
        Ok(AsyncReadExt::read_u8(self).await?)
    }

    async fn read_u16(&mut self) -> Result<u16> {
        Ok(AsyncReadExt::read_u16(self).await?)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        AsyncReadExt::read_exact(self, buf).await?;
        Ok(())
    }
}

async fn read_exact_via_records(stream: &mut EncryptedStream, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(TunnelError::UnexpectedEof);
        }
        filled += n;
    }
    Ok(())
}

impl ByteSource for EncryptedStream {
    async fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        read_exact_via_records(self, &mut buf).await?;
        Ok(buf[0])
    }

    async fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        read_exact_via_records(self, &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        read_exact_via_records(self, buf).await
    }
}

async fn read_exact_via_records_half(stream: &mut EncryptedReadHalf, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(TunnelError::UnexpectedEof);
        }
        filled += n;
    }
    Ok(())
}

impl ByteSource for EncryptedReadHalf {
    async fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        read_exact_via_records_half(self, &mut buf).await?;
        Ok(buf[0])
    }

    async fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        read_exact_via_records_half(self, &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        read_exact_via_records_half(self, buf).await
    }
}
