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

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::encrypted_stream::{EncryptedReadHalf, EncryptedWriteHalf};

const COPY_BUF_SIZE: usize = 32 * 1024;
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Bidirectionally copies plaintext between an application socket and the
/// encrypted tunnel leg until both directions see EOF or error. When one
/// direction finishes, the other is given `DRAIN_DEADLINE` to finish on its
/// own before being abandoned, so a stalled peer can't pin the flow open.
pub async fn splice(app: TcpStream, tunnel_cipher: EncryptedReadHalf, tunnel_plain: EncryptedWriteHalf) {
    let (app_read, app_write) = app.into_split();

    let app_to_tunnel = tokio::spawn(copy_app_to_tunnel(app_read, tunnel_plain));
    let tunnel_to_app = tokio::spawn(copy_tunnel_to_app(tunnel_cipher, app_write));

    tokio::select! {
        _ = app_to_tunnel => drain(tunnel_to_app).await,
        _ = tunnel_to_app => drain(app_to_tunnel).await,
    }
}

async fn drain(handle: tokio::task::JoinHandle<()>) {
    if timeout(DRAIN_DEADLINE, handle).await.is_err() {
        debug!("peer direction did not drain within {:?}; flow released", DRAIN_DEADLINE);
    }
}

async fn copy_app_to_tunnel(
    mut app_read: tokio::net::tcp::OwnedReadHalf,
    mut tunnel_write: EncryptedWriteHalf,
) {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match app_read.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if tunnel_write.write_all(&buf[..n]).await.is_err() {
            break;
        }
    }
    let _ = tunnel_write.shutdown().await;
}

async fn copy_tunnel_to_app(
    mut tunnel_read: EncryptedReadHalf,
    mut app_write: tokio::net::tcp::OwnedWriteHalf,
) {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match tunnel_read.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if app_write.write_all(&buf[..n]).await.is_err() {
            break;
        }
    }
    let _ = app_write.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{Cipher, Method};
    use crate::encrypted_stream::EncryptedStream;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let (client, (server, _)) = tokio::join!(client, listener.accept());
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn echoes_app_bytes_through_the_tunnel() {
        // app <-> (splice) <-> tunnel_near <===tcp===> tunnel_far, with an
        // echo task reading decrypted bytes off tunnel_far and bouncing
        // them straight back.
        let (app_near, mut app_far) = connected_pair().await;
        let (tun_near, tun_far) = connected_pair().await;

        let cipher = Arc::new(Cipher::new(Method::Aes, "secret"));
        let (tunnel_read, tunnel_write) = EncryptedStream::new(tun_near, cipher.clone()).split();

        let splice_task = tokio::spawn(splice(app_near, tunnel_read, tunnel_write));

        let echo_task = tokio::spawn(async move {
            let mut far = EncryptedStream::new(tun_far, cipher);
            let mut buf = [0u8; 4096];
            loop {
                let n = far.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                far.write_all(&buf[..n]).await.unwrap();
            }
        });

        app_far.write_all(b"ping\n").await.unwrap();
        let mut reply = [0u8; 5];
        app_far.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping\n");

        drop(app_far);
        splice_task.await.unwrap();
        echo_task.abort();
    }
}
