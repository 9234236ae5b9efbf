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
use crate::negotiator;
use crate::splice::splice;

/// Per-connection orchestration on the local (SOCKS5-facing) side: negotiate
/// the destination with the application, dial the remote relay, wrap it in
/// the encrypted stream, announce the destination, then splice.
pub async fn run(mut app_sock: TcpStream, relay_addr: String, cipher: Arc<Cipher>) {
    let target = match negotiator::negotiate(&mut app_sock).await {
        Ok(target) => target,
        Err(err) => {
            debug!("SOCKS5 negotiation failed: {err}");
            return;
        }
    };

    let relay_sock = match TcpStream::connect(&relay_addr).await {
        Ok(sock) => sock,
        Err(err) => {
            warn!("failed to dial relay {relay_addr}: {err}");
            return;
        }
    };

    let mut tunnel = EncryptedStream::new(relay_sock, cipher);
    if let Err(err) = tunnel.write_all(&target.serialize()).await {
        warn!("failed to announce destination {}: {err}", target.to_hostport());
        return;
    }

    debug!("flow established to {}", target.to_hostport());
    let (tunnel_read, tunnel_write) = tunnel.split();
    splice(app_sock, tunnel_read, tunnel_write).await;
}
