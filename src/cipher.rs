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

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Result, TunnelError};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_SIZE: usize = 16;
const IV_SIZE: usize = 16;

/// Which wire encoding an `EncryptedStream` applies to each record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// AES-128-CBC with a fresh random IV per record (the production path).
    Aes,
    /// No encryption; records still carry a (fixed, all-zero) IV field and
    /// PKCS#7 padding so the framing code path is identical. For testing
    /// only.
    Dummy,
}

/// Derives an AES-128 key from a pre-shared secret and performs record
/// encryption/decryption. Immutable after construction; shared read-only
/// across every flow in the process.
pub struct Cipher {
    method: Method,
    key: [u8; 16],
}

impl Cipher {
    pub fn new(method: Method, key_string: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(key_string.as_bytes());
        let key: [u8; 16] = hasher.finalize().into();
        Cipher { method, key }
    }

    /// PKCS#7-pads `plaintext`, draws a fresh IV, and returns `IV ||
    /// ciphertext`. Output length is always `16 + padded_len`, a positive
    /// multiple of 16 that is at least 32.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_SIZE];
        if self.method == Method::Aes {
            OsRng.fill_bytes(&mut iv);
        }

        let padded_len = plaintext.len() + (BLOCK_SIZE - plaintext.len() % BLOCK_SIZE);
        let mut buf = vec![0u8; padded_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);

        match self.method {
            Method::Aes => {
                let ct = Aes128CbcEnc::new(GenericArray::from_slice(&self.key), GenericArray::from_slice(&iv))
                    .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
                    .expect("buffer sized for worst-case padding")
                    .to_vec();
                let mut out = Vec::with_capacity(IV_SIZE + ct.len());
                out.extend_from_slice(&iv);
                out.extend_from_slice(&ct);
                out
            }
            Method::Dummy => {
                // Apply the same PKCS#7 padding by hand so the framing and
                // leftover logic downstream never has to special-case it.
                let pad = padded_len - plaintext.len();
                for b in &mut buf[plaintext.len()..] {
                    *b = pad as u8;
                }
                let mut out = Vec::with_capacity(IV_SIZE + buf.len());
                out.extend_from_slice(&iv);
                out.extend_from_slice(&buf);
                out
            }
        }
    }

    /// Splits off the IV, decrypts the remainder, and strips PKCS#7 padding.
    /// Requires `ciphertext.len() >= 32` and a multiple of 16, already
    /// validated by the caller against the record length prefix.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < IV_SIZE + BLOCK_SIZE || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(TunnelError::MalformedRecord(format!(
                "ciphertext length {} is not a valid record body", ciphertext.len()
            )));
        }
        let (iv, body) = ciphertext.split_at(IV_SIZE);

        match self.method {
            Method::Aes => {
                let mut buf = body.to_vec();
                let pt = Aes128CbcDec::new(GenericArray::from_slice(&self.key), GenericArray::from_slice(iv))
                    .decrypt_padded_mut::<Pkcs7>(&mut buf)
                    .map_err(|_| TunnelError::BadPadding)?;
                Ok(pt.to_vec())
            }
            Method::Dummy => {
                let pad = *body.last().ok_or(TunnelError::BadPadding)? as usize;
                if pad == 0 || pad > body.len() || pad > BLOCK_SIZE {
                    return Err(TunnelError::BadPadding);
                }
                Ok(body[..body.len() - pad].to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_payloads() {
        let cipher = Cipher::new(Method::Aes, "secret");
        for len in [0, 1, 15, 16, 17, 1000, 65536 - 32] {
            let plaintext = vec![0xABu8; len];
            let ct = cipher.encrypt(&plaintext);
            let pt = cipher.decrypt(&ct).unwrap();
            assert_eq!(pt, plaintext, "round-trip failed for len {len}");
        }
    }

    #[test]
    fn encrypted_length_is_bounded_multiple_of_16() {
        let cipher = Cipher::new(Method::Aes, "secret");
        for len in [0, 1, 15, 16, 200] {
            let ct = cipher.encrypt(&vec![0u8; len]);
            assert_eq!(ct.len() % 16, 0);
            assert!(ct.len() >= 32);
        }
    }

    #[test]
    fn independent_encryptions_differ() {
        let cipher = Cipher::new(Method::Aes, "secret");
        let plaintext = b"the quick brown fox";
        let a = cipher.encrypt(plaintext);
        let b = cipher.encrypt(plaintext);
        assert_ne!(&a[..16], &b[..16], "IVs should differ");
        assert_ne!(a, b, "ciphertext should differ with overwhelming probability");
    }

    #[test]
    fn decrypt_rejects_short_or_misaligned_ciphertext() {
        let cipher = Cipher::new(Method::Aes, "secret");
        assert!(cipher.decrypt(&[0u8; 16]).is_err());
        assert!(cipher.decrypt(&[0u8; 33]).is_err());
    }

    #[test]
    fn mismatched_keys_fail_to_decrypt() {
        let a = Cipher::new(Method::Aes, "A");
        let b = Cipher::new(Method::Aes, "B");
        let ct = a.encrypt(b"ping");
        assert!(b.decrypt(&ct).is_err());
    }

    #[test]
    fn dummy_method_round_trips_without_encryption() {
        let cipher = Cipher::new(Method::Dummy, "unused");
        let plaintext = b"plain as day";
        let ct = cipher.encrypt(plaintext);
        assert_eq!(&ct[16..16 + plaintext.len()], plaintext);
        assert_eq!(cipher.decrypt(&ct).unwrap(), plaintext);
    }
}
