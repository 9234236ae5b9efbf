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
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::warn;

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Classic accept loop: on a recoverable accept error, sleeps with an
/// exponential backoff starting at 5ms and capped at 1s, doubling each
/// consecutive failure and resetting to zero on the next success.
/// Non-transient errors terminate the loop, surfacing the last error.
pub async fn accept_loop<F, Fut>(listener: &TcpListener, mut on_accept: F) -> std::io::Error
    where F: FnMut(TcpStream, std::net::SocketAddr) -> Fut, Fut: std::future::Future<Output = ()>
{
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match listener.accept().await {
            Ok((sock, addr)) => {
                backoff = INITIAL_BACKOFF;
                on_accept(sock, addr).await;
            }
            Err(err) if is_transient(&err) => {
                warn!("transient accept error: {err}; backing off {backoff:?}");
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(err) => return err,
        }
    }
}

// EAGAIN/EWOULDBLOCK/EINTR and a dropped-before-accept peer are the
// classic "temporary network error" cases; everything else (e.g. a bad
// file descriptor or out-of-memory condition) is treated as fatal.
fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let mut backoff = INITIAL_BACKOFF;
        let mut schedule = vec![backoff];
        for _ in 0..10 {
            backoff = (backoff * 2).min(MAX_BACKOFF);
            schedule.push(backoff);
        }
        assert_eq!(schedule[0], Duration::from_millis(5));
        assert_eq!(schedule[1], Duration::from_millis(10));
        assert_eq!(schedule[2], Duration::from_millis(20));
        assert_eq!(*schedule.last().unwrap(), Duration::from_secs(1));
        assert!(schedule.iter().all(|d| *d <= MAX_BACKOFF));
    }

    #[test]
    fn connection_reset_is_transient() {
        let err = std::io::Error::from(ErrorKind::ConnectionReset);
        assert!(is_transient(&err));
    }

    #[test]
    fn invalid_input_is_not_transient() {
        let err = std::io::Error::from(ErrorKind::InvalidInput);
        assert!(!is_transient(&err));
    }
}
