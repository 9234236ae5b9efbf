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

use std::io;

#[derive(thiserror::Error, Debug)]
pub enum TunnelError {
    #[error("bad protocol version or unexpected message")]
    BadProtocol,

    #[error("malformed address")]
    MalformedAddress,

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("bad PKCS#7 padding")]
    BadPadding,

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("unsupported SOCKS command")]
    Unsupported,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<TunnelError> for io::Error {
    fn from(err: TunnelError) -> io::Error {
        match err {
            TunnelError::Io(err) => err,
            TunnelError::UnexpectedEof =>
                io::Error::new(io::ErrorKind::UnexpectedEof, err.to_string()),
            other => io::Error::other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
