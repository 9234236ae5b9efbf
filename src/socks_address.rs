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

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::byte_source::ByteSource;
use crate::error::{Result, TunnelError};

const ATYP_IPV4: u8 = 0x01;
const ATYP_FQDN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// A RFC 1928 destination address: an address-type tag, a family-specific
/// body, and a big-endian port. `serialize()` is bit-identical to the wire
/// form this type was parsed from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocksAddress {
    V4(Ipv4Addr, u16),
    Fqdn(String, u16),
    V6(Ipv6Addr, u16),
}

impl SocksAddress {
    /// Reads one type byte, the family's body, and a port, directly off an
    /// async byte source. Fails with `MalformedAddress` on an unknown type
    /// byte or an invalid FQDN length.
    pub async fn read_from<S>(stream: &mut S) -> Result<Self>
        where S: ByteSource
    {
        let atyp = stream.read_u8().await?;
        match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await?;
                let port = stream.read_u16().await?;
                Ok(SocksAddress::V4(Ipv4Addr::from(octets), port))
            }
            ATYP_FQDN => {
                let len = stream.read_u8().await?;
                if len == 0 {
                    return Err(TunnelError::MalformedAddress);
                }
                let mut buf = vec![0u8; len as usize];
                stream.read_exact(&mut buf).await?;
                let host = String::from_utf8(buf)
                    .map_err(|_| TunnelError::MalformedAddress)?;
                let port = stream.read_u16().await?;
                Ok(SocksAddress::Fqdn(host, port))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets).await?;
                let port = stream.read_u16().await?;
                Ok(SocksAddress::V6(Ipv6Addr::from(octets), port))
            }
            _ => Err(TunnelError::MalformedAddress),
        }
    }

    /// Serializes to the exact wire form: type byte, body, big-endian port.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            SocksAddress::V4(addr, port) => {
                let mut buf = Vec::with_capacity(7);
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&addr.octets());
                buf.extend_from_slice(&port.to_be_bytes());
                buf
            }
            SocksAddress::Fqdn(host, port) => {
                let mut buf = Vec::with_capacity(4 + host.len());
                buf.push(ATYP_FQDN);
                buf.push(host.len() as u8);
                buf.extend_from_slice(host.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                buf
            }
            SocksAddress::V6(addr, port) => {
                let mut buf = Vec::with_capacity(19);
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&addr.octets());
                buf.extend_from_slice(&port.to_be_bytes());
                buf
            }
        }
    }

    /// Renders as `host:port` text, wrapping IPv6 hosts in `[...]` the way
    /// URL authorities do.
    pub fn to_hostport(&self) -> String {
        match self {
            SocksAddress::V4(addr, port) => format!("{addr}:{port}"),
            SocksAddress::Fqdn(host, port) => format!("{host}:{port}"),
            SocksAddress::V6(addr, port) => format!("[{addr}]:{port}"),
        }
    }
}
