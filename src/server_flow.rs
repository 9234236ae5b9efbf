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

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::cipher::Cipher;
use crate::encrypted_stream::EncryptedStream;
use crate::socks_address::SocksAddress;
use crate::splice::splice;

/// Per-connection orchestration on the remote (egress-dialing) side: wrap
/// the accepted relay connection in the encrypted stream, read the
/// destination address off it, dial that destination in the clear, then
/// splice.
pub async fn run(relay_sock: TcpStream, cipher: Arc<Cipher>) {
    let mut tunnel = EncryptedStream::new(relay_sock, cipher);

    let target = match read_target(&mut tunnel).await {
        Ok(target) => target,
        Err(err) => {
            warn!("failed to read destination from tunnel: {err}");
            return;
        }
    };

    let origin_sock = match TcpStream::connect(target.to_hostport()).await {
        Ok(sock) => sock,
        Err(err) => {
            warn!("failed to dial origin {}: {err}", target.to_hostport());
            return;
        }
    };

    debug!("flow established to {}", target.to_hostport());
    let (tunnel_read, tunnel_write) = tunnel.split();
    splice(origin_sock, tunnel_read, tunnel_write).await;
}

/// Reads one `SocksAddress` from the decrypted stream. The address may be
/// split across multiple wire records; `EncryptedStream::read` hides that
/// from the caller via its leftover buffering (see `byte_source`).
async fn read_target(tunnel: &mut EncryptedStream) -> crate::error::Result<SocksAddress> {
    SocksAddress::read_from(tunnel).await
}
