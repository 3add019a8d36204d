//! AES-128/CFB8 stream encryption, one independent context per socket.
//!
//! Every transform here is stateful: each byte of a direction must pass
//! through exactly once, in arrival order. Skipping or reordering bytes
//! desynchronizes that direction for good.

use super::Direction;
use aes::{cipher::generic_array::GenericArray, Aes128};
use cfb8::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::slice;

/// Length of the negotiated shared secret (an AES-128 key).
pub const SHARED_SECRET_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("shared secret must be {SHARED_SECRET_LEN} bytes, got {0}")]
    InvalidSecretLength(usize),
}

/// Encrypt/decrypt state for one socket.
struct CipherPair {
    encryptor: cfb8::Encryptor<Aes128>,
    decryptor: cfb8::Decryptor<Aes128>,
}

impl CipherPair {
    fn new(secret: &[u8; SHARED_SECRET_LEN]) -> Self {
        let key = GenericArray::from_slice(secret);
        Self {
            encryptor: cfb8::Encryptor::new(key, key),
            decryptor: cfb8::Decryptor::new(key, key),
        }
    }

    fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            let block = slice::from_mut(byte);
            self.encryptor
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }

    fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            let block = slice::from_mut(byte);
            self.decryptor
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}

/// The two cipher contexts of an encrypted connection: the one shared with
/// the client and the one shared with the server. Both are seeded from the
/// literal shared secret, used as key and IV.
pub struct CipherComplex {
    client: CipherPair,
    server: CipherPair,
}

impl CipherComplex {
    pub fn establish(shared_secret: &[u8]) -> Result<Self, CipherError> {
        let secret: &[u8; SHARED_SECRET_LEN] = shared_secret
            .try_into()
            .map_err(|_| CipherError::InvalidSecretLength(shared_secret.len()))?;
        Ok(Self {
            client: CipherPair::new(secret),
            server: CipherPair::new(secret),
        })
    }

    pub fn encrypt_toward_client(&mut self, data: &mut [u8]) {
        self.client.encrypt(data);
    }

    pub fn decrypt_from_client(&mut self, data: &mut [u8]) {
        self.client.decrypt(data);
    }

    pub fn encrypt_toward_server(&mut self, data: &mut [u8]) {
        self.server.encrypt(data);
    }

    pub fn decrypt_from_server(&mut self, data: &mut [u8]) {
        self.server.decrypt(data);
    }

    /// Decrypts bytes that arrived travelling in `direction`.
    pub fn decrypt_inbound(&mut self, direction: Direction, data: &mut [u8]) {
        match direction {
            Direction::Clientbound => self.decrypt_from_server(data),
            Direction::Serverbound => self.decrypt_from_client(data),
        }
    }

    /// Encrypts bytes about to be forwarded in `direction`.
    pub fn encrypt_outbound(&mut self, direction: Direction, data: &mut [u8]) {
        match direction {
            Direction::Clientbound => self.encrypt_toward_client(data),
            Direction::Serverbound => self.encrypt_toward_server(data),
        }
    }
}

impl std::fmt::Debug for CipherComplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherComplex").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; 16] = *b"0123456789abcdef";

    #[test]
    fn rejects_wrong_secret_length() {
        assert!(matches!(
            CipherComplex::establish(&[0; 15]),
            Err(CipherError::InvalidSecretLength(15))
        ));
    }

    #[test]
    fn directions_are_independent() {
        let mut cipher = CipherComplex::establish(&SECRET).unwrap();
        let serverbound = b"serverbound bytes travelling to the server".to_vec();
        let clientbound = b"clientbound bytes travelling to the client".to_vec();

        let mut to_server = serverbound.clone();
        cipher.encrypt_toward_server(&mut to_server);
        let mut to_client = clientbound.clone();
        cipher.encrypt_toward_client(&mut to_client);
        assert_ne!(to_server, serverbound);
        assert_ne!(to_client, clientbound);

        let mut plain = to_server.clone();
        cipher.decrypt_from_server(&mut plain);
        assert_eq!(plain, serverbound);

        let mut plain = to_client.clone();
        cipher.decrypt_from_client(&mut plain);
        assert_eq!(plain, clientbound);

        // the client context has advanced over clientbound ciphertext
        let mut crossed = to_server.clone();
        cipher.decrypt_from_client(&mut crossed);
        assert_ne!(crossed, serverbound);
    }

    #[test]
    fn split_calls_match_one_call() {
        let data: Vec<u8> = (0..=255).collect();

        let mut whole = data.clone();
        CipherComplex::establish(&SECRET)
            .unwrap()
            .encrypt_toward_server(&mut whole);

        let mut cipher = CipherComplex::establish(&SECRET).unwrap();
        let mut pieces = data.clone();
        let (a, rest) = pieces.split_at_mut(3);
        let (b, c) = rest.split_at_mut(100);
        cipher.encrypt_toward_server(a);
        cipher.encrypt_toward_server(b);
        cipher.encrypt_toward_server(c);
        assert_eq!(pieces, whole);
    }
}
