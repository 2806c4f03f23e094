//! Encrypt and decrypt endpoints
//!
//! The encryptor emits its IV ahead of the first ciphertext. The decryptor
//! starts out awaiting that IV, holding short chunks until `iv_len` bytes
//! have arrived, then binds the real cipher and decrypts whatever follows
//! in the same chunk.

use std::fmt;
use std::io;
use std::sync::Arc;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{
    consts::U16, Block, BlockCipher, BlockDecryptMut, BlockEncrypt, BlockEncryptMut,
    InnerIvInit, InvalidLength, KeyInit, KeyIvInit, StreamCipher,
};
use aes::{Aes128, Aes192, Aes256};
use blowfish::Blowfish;
use bytes::BytesMut;
use camellia::{Camellia128, Camellia192, Camellia256};
use cast5::Cast5;
use cfb_mode::{BufDecryptor, BufEncryptor};
use ctr::Ctr128BE;
use des::Des;
use idea::Idea;
use ofb::Ofb;
use rc2::Rc2;
use tracing::trace;

use super::kdf::KeyMaterial;
use super::method::CipherMethod;
use crate::error::SocksError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// One direction of a cipher, applied in place to consecutive chunks
trait Keystream: Send {
    fn apply(&mut self, data: &mut [u8]);
}

struct CfbEncrypt<C: BlockEncryptMut + BlockCipher>(BufEncryptor<C>);
struct CfbDecrypt<C: BlockEncryptMut + BlockCipher>(BufDecryptor<C>);
struct Cfb8Encrypt<C: BlockEncryptMut + BlockCipher>(cfb8::Encryptor<C>);
struct Cfb8Decrypt<C: BlockEncryptMut + BlockCipher>(cfb8::Decryptor<C>);
struct Stream<S>(S);

impl<C: BlockEncryptMut + BlockCipher + Send> Keystream for CfbEncrypt<C> {
    fn apply(&mut self, data: &mut [u8]) {
        self.0.encrypt(data);
    }
}

impl<C: BlockEncryptMut + BlockCipher + Send> Keystream for CfbDecrypt<C> {
    fn apply(&mut self, data: &mut [u8]) {
        self.0.decrypt(data);
    }
}

// CFB-8 works on one-byte blocks
impl<C: BlockEncryptMut + BlockCipher + Send> Keystream for Cfb8Encrypt<C> {
    fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.0
                .encrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
        }
    }
}

impl<C: BlockEncryptMut + BlockCipher + Send> Keystream for Cfb8Decrypt<C> {
    fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.0
                .decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
        }
    }
}

impl<S: StreamCipher + Send> Keystream for Stream<S> {
    fn apply(&mut self, data: &mut [u8]) {
        self.0.apply_keystream(data);
    }
}

/// CFB with one-bit feedback, most significant bit first
struct Cfb1<C: BlockEncrypt> {
    cipher: C,
    register: Block<C>,
    direction: Direction,
}

impl<C: BlockEncrypt + Send> Keystream for Cfb1<C> {
    fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let input = *byte;
            let mut output = 0u8;
            for bit in (0..8).rev() {
                let mut pad = self.register.clone();
                self.cipher.encrypt_block(&mut pad);

                let in_bit = (input >> bit) & 1;
                let out_bit = in_bit ^ (pad[0] >> 7);
                output |= out_bit << bit;

                let feedback = match self.direction {
                    Direction::Encrypt => out_bit,
                    Direction::Decrypt => in_bit,
                };
                shift_in_bit(&mut self.register, feedback);
            }
            *byte = output;
        }
    }
}

fn shift_in_bit(register: &mut [u8], bit: u8) {
    let last = register.len() - 1;
    for i in 0..last {
        register[i] = (register[i] << 1) | (register[i + 1] >> 7);
    }
    register[last] = (register[last] << 1) | bit;
}

fn invalid_length(_: InvalidLength) -> SocksError {
    SocksError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        "invalid cipher key or IV length",
    ))
}

fn block<C: KeyInit>(key: &[u8]) -> Result<C, SocksError> {
    C::new_from_slice(key).map_err(invalid_length)
}

fn cfb<C>(cipher: C, iv: &[u8], direction: Direction) -> Result<Box<dyn Keystream>, SocksError>
where
    C: BlockEncryptMut + BlockCipher + Send + 'static,
{
    Ok(match direction {
        Direction::Encrypt => Box::new(CfbEncrypt(
            BufEncryptor::inner_iv_slice_init(cipher, iv).map_err(invalid_length)?,
        )),
        Direction::Decrypt => Box::new(CfbDecrypt(
            BufDecryptor::inner_iv_slice_init(cipher, iv).map_err(invalid_length)?,
        )),
    })
}

fn cfb8<C>(cipher: C, iv: &[u8], direction: Direction) -> Result<Box<dyn Keystream>, SocksError>
where
    C: BlockEncryptMut + BlockCipher + Send + 'static,
{
    Ok(match direction {
        Direction::Encrypt => Box::new(Cfb8Encrypt(
            cfb8::Encryptor::inner_iv_slice_init(cipher, iv).map_err(invalid_length)?,
        )),
        Direction::Decrypt => Box::new(Cfb8Decrypt(
            cfb8::Decryptor::inner_iv_slice_init(cipher, iv).map_err(invalid_length)?,
        )),
    })
}

fn cfb1<C>(cipher: C, iv: &[u8], direction: Direction) -> Result<Box<dyn Keystream>, SocksError>
where
    C: BlockEncrypt + Send + 'static,
{
    if iv.len() != C::block_size() {
        return Err(invalid_length(InvalidLength));
    }
    Ok(Box::new(Cfb1 {
        cipher,
        register: GenericArray::clone_from_slice(iv),
        direction,
    }))
}

fn stream<S>(cipher: Result<S, InvalidLength>) -> Result<Box<dyn Keystream>, SocksError>
where
    S: StreamCipher + Send + 'static,
{
    Ok(Box::new(Stream(cipher.map_err(invalid_length)?)))
}

fn keystream(
    method: CipherMethod,
    key: &[u8],
    iv: &[u8],
    direction: Direction,
) -> Result<Box<dyn Keystream>, SocksError> {
    use CipherMethod::*;

    match method {
        Aes128Cfb => cfb(block::<Aes128>(key)?, iv, direction),
        Aes192Cfb => cfb(block::<Aes192>(key)?, iv, direction),
        Aes256Cfb => cfb(block::<Aes256>(key)?, iv, direction),
        Aes128Ofb => stream(Ofb::<Aes128>::new_from_slices(key, iv)),
        Aes192Ofb => stream(Ofb::<Aes192>::new_from_slices(key, iv)),
        Aes256Ofb => stream(Ofb::<Aes256>::new_from_slices(key, iv)),
        Aes128Ctr => stream(Ctr128BE::<Aes128>::new_from_slices(key, iv)),
        Aes192Ctr => stream(Ctr128BE::<Aes192>::new_from_slices(key, iv)),
        Aes256Ctr => stream(Ctr128BE::<Aes256>::new_from_slices(key, iv)),
        Aes128Cfb8 => cfb8(block::<Aes128>(key)?, iv, direction),
        Aes192Cfb8 => cfb8(block::<Aes192>(key)?, iv, direction),
        Aes256Cfb8 => cfb8(block::<Aes256>(key)?, iv, direction),
        Aes128Cfb1 => cfb1(block::<Aes128>(key)?, iv, direction),
        Aes192Cfb1 => cfb1(block::<Aes192>(key)?, iv, direction),
        Aes256Cfb1 => cfb1(block::<Aes256>(key)?, iv, direction),
        BfCfb => cfb(block::<Blowfish>(key)?, iv, direction),
        Camellia128Cfb => cfb(block::<Camellia128>(key)?, iv, direction),
        Camellia192Cfb => cfb(block::<Camellia192>(key)?, iv, direction),
        Camellia256Cfb => cfb(block::<Camellia256>(key)?, iv, direction),
        Cast5Cfb => cfb(block::<Cast5>(key)?, iv, direction),
        DesCfb => cfb(block::<Des>(key)?, iv, direction),
        IdeaCfb => cfb(block::<Idea>(key)?, iv, direction),
        // Effective key bits follow the key length
        Rc2Cfb => cfb(Rc2::new_with_eff_key_len(key, key.len() * 8), iv, direction),
        Rc4 => stream(rc4::Rc4::<U16>::new_from_slice(key)),
    }
}

/// Outbound half of a connection's cipher
pub struct Encryptor {
    method: CipherMethod,
    pending_iv: Option<Vec<u8>>,
    keystream: Box<dyn Keystream>,
}

impl Encryptor {
    pub(crate) fn new(method: CipherMethod, key: &[u8], iv: Vec<u8>) -> Result<Self, SocksError> {
        let keystream = keystream(method, key, &iv, Direction::Encrypt)?;
        Ok(Self {
            method,
            pending_iv: Some(iv),
            keystream,
        })
    }

    /// Append ciphertext of `plain` to `out`, preceded by the IV on first use
    pub fn encrypt(&mut self, plain: &[u8], out: &mut BytesMut) {
        if let Some(iv) = self.pending_iv.take() {
            out.extend_from_slice(&iv);
        }
        let start = out.len();
        out.extend_from_slice(plain);
        self.keystream.apply(&mut out[start..]);
    }

    pub fn iv_sent(&self) -> bool {
        self.pending_iv.is_none()
    }
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("method", &self.method)
            .field("iv_sent", &self.iv_sent())
            .finish()
    }
}

enum DecryptState {
    AwaitingIv {
        material: Arc<KeyMaterial>,
        held: Vec<u8>,
    },
    Bound(Box<dyn Keystream>),
}

/// Inbound half of a connection's cipher
pub struct Decryptor {
    method: CipherMethod,
    state: DecryptState,
}

impl Decryptor {
    pub(crate) fn new(method: CipherMethod, material: Arc<KeyMaterial>) -> Self {
        Self {
            method,
            state: DecryptState::AwaitingIv {
                material,
                held: Vec::with_capacity(method.iv_len()),
            },
        }
    }

    /// Append plaintext of `data` to `out`. Bytes belonging to the IV are
    /// consumed without output.
    pub fn decrypt(&mut self, mut data: &[u8], out: &mut BytesMut) -> Result<(), SocksError> {
        if let DecryptState::AwaitingIv { material, held } = &mut self.state {
            let need = self.method.iv_len() - held.len();
            if data.len() < need {
                held.extend_from_slice(data);
                return Ok(());
            }
            held.extend_from_slice(&data[..need]);
            let bound = keystream(self.method, &material.key, held, Direction::Decrypt)?;
            trace!(method = %self.method, "Decryptor bound to peer IV");
            self.state = DecryptState::Bound(bound);
            data = &data[need..];
        }

        if let DecryptState::Bound(keystream) = &mut self.state {
            if !data.is_empty() {
                let start = out.len();
                out.extend_from_slice(data);
                keystream.apply(&mut out[start..]);
            }
        }
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, DecryptState::Bound(_))
    }
}

impl fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decryptor")
            .field("method", &self.method)
            .field("bound", &self.is_bound())
            .finish()
    }
}
