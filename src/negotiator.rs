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

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Result, TunnelError};
use crate::socks_address::SocksAddress;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;

const REP_SUCCEEDED: u8 = 0x00;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;

const SUCCESS_REPLY: [u8; 10] =
    [SOCKS_VERSION, REP_SUCCEEDED, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

/// Runs the server side of a RFC 1928 handshake, CONNECT only, no-auth
/// only. On success, hands back the requested destination; the caller
/// (`ClientFlow`) is responsible for dialing it — the negotiator never
/// dials.
pub async fn negotiate(sock: &mut TcpStream) -> Result<SocksAddress> {
    method_select(sock).await?;
    let addr = request(sock).await?;
    sock.write_all(&SUCCESS_REPLY).await?;
    Ok(addr)
}

async fn method_select(sock: &mut TcpStream) -> Result<()> {
    let ver = sock.read_u8().await?;
    if ver != SOCKS_VERSION {
        return Err(TunnelError::BadProtocol);
    }
    let nmethods = sock.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    sock.read_exact(&mut methods).await?;

    sock.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;
    Ok(())
}

async fn request(sock: &mut TcpStream) -> Result<SocksAddress> {
    let ver = sock.read_u8().await?;
    if ver != SOCKS_VERSION {
        return Err(TunnelError::BadProtocol);
    }
    let cmd = sock.read_u8().await?;
    let _rsv = sock.read_u8().await?;

    let addr = match SocksAddress::read_from(sock).await {
        Ok(addr) => addr,
        Err(_) => return Err(TunnelError::MalformedAddress),
    };

    if cmd != CMD_CONNECT {
        let mut reply = SUCCESS_REPLY;
        reply[1] = REP_COMMAND_NOT_SUPPORTED;
        let _ = sock.write_all(&reply).await;
        return Err(TunnelError::Unsupported);
    }

    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let (client, (server, _)) = tokio::join!(client, listener.accept());
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn successful_connect_round_trip() {
        let (mut client, mut server) = connected_pair().await;

        let client_task = tokio::spawn(async move {
            client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
            let mut method_reply = [0u8; 2];
            client.read_exact(&mut method_reply).await.unwrap();
            assert_eq!(method_reply, [0x05, 0x00]);

            let target = SocksAddress::Fqdn("localhost".to_string(), 9000);
            let mut req = vec![0x05, 0x01, 0x00];
            req.extend_from_slice(&target.serialize());
            client.write_all(&req).await.unwrap();

            let mut reply = [0u8; 10];
            client.read_exact(&mut reply).await.unwrap();
            assert_eq!(reply, SUCCESS_REPLY);
        });

        let addr = negotiate(&mut server).await.unwrap();
        assert_eq!(addr, SocksAddress::Fqdn("localhost".to_string(), 9000));
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn bad_version_closes_without_reply() {
        let (mut client, mut server) = connected_pair().await;
        client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

        let err = negotiate(&mut server).await.unwrap_err();
        assert!(matches!(err, TunnelError::BadProtocol));
    }

    #[tokio::test]
    async fn unsupported_command_is_rejected() {
        let (mut client, mut server) = connected_pair().await;

        let client_task = tokio::spawn(async move {
            client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
            let mut method_reply = [0u8; 2];
            client.read_exact(&mut method_reply).await.unwrap();

            // BIND (0x02) instead of CONNECT
            let target = SocksAddress::V4(Ipv4Addr::new(127, 0, 0, 1), 9000);
            let mut req = vec![0x05, 0x02, 0x00];
            req.extend_from_slice(&target.serialize());
            client.write_all(&req).await.unwrap();
        });

        let err = negotiate(&mut server).await.unwrap_err();
        assert!(matches!(err, TunnelError::Unsupported));
        client_task.await.unwrap();
    }
}
