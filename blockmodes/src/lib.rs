//! AES-128 modes of operation: ECB, CBC and CTR, over PKCS#7 padding.
//!
//! The block permutation itself comes from openssl and is never
//! reimplemented here; this crate only layers padding, chaining and
//! counters on top of single-block calls. Padding failures surface as the
//! typed [`CipherError::InvalidPadding`], which the oracle layer turns into
//! the one-bit side channel the padding-oracle attack feeds on.

#[macro_use]
extern crate failure;
extern crate openssl;
extern crate rand;
extern crate xor;

use failure::Error;
use openssl::symm;
use rand::Rng;
use xor::Xor;

pub const BLOCK_SIZE: usize = 16;
pub const NONCE_SIZE: usize = BLOCK_SIZE / 2;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Ecb,
    Cbc,
    Ctr,
}

#[derive(Debug, Fail)]
pub enum CipherError {
    /// Recoverable and expected: the trailing bytes of a decrypted message
    /// do not form a consistent PKCS#7 run. Never conflated with the
    /// configuration errors below.
    #[fail(display = "invalid padding")]
    InvalidPadding,

    #[fail(display = "key must consist of {} bytes, got {}", expected, actual)]
    InvalidKeyLength { expected: usize, actual: usize },

    #[fail(display = "iv must consist of {} bytes, got {}", expected, actual)]
    InvalidIvLength { expected: usize, actual: usize },

    #[fail(display = "input length {} is not a multiple of the block size", len)]
    InvalidBlockAlignment { len: usize },

    #[fail(display = "block cipher failure: {}", reason)]
    BlockCipherFailed { reason: String },
}

/// Appends PKCS#7 padding. A message that already fills its last block
/// still receives a full extra block, so a decrypted message always carries
/// padding and stripping never has to guess.
pub fn pad_inplace(u: &mut Vec<u8>, k: u8) -> Result<(), Error> {
    ensure!(k >= 2, "block size must be at least 2");

    let p = k - (u.len() % k as usize) as u8;
    let padded_len = u.len() + p as usize;
    u.resize(padded_len, p);
    Ok(())
}

pub fn pad(u: &[u8], k: u8) -> Result<Vec<u8>, Error> {
    let mut v = u.to_vec();
    pad_inplace(&mut v, k)?;
    Ok(v)
}

pub fn padding_valid(u: &[u8], k: u8) -> Result<bool, Error> {
    ensure!(k >= 2, "block size must be at least 2");

    if u.is_empty() || u.len() % k as usize != 0 {
        return Ok(false);
    }
    let p = u[u.len() - 1];
    if p < 1 || p > k {
        return Ok(false);
    }
    Ok(u[u.len() - p as usize..].iter().all(|&b| b == p))
}

pub fn unpad_inplace(u: &mut Vec<u8>, k: u8) -> Result<(), Error> {
    if !padding_valid(u, k)? {
        return Err(CipherError::InvalidPadding.into());
    }

    let stripped_len = u.len() - u[u.len() - 1] as usize;
    u.truncate(stripped_len);
    Ok(())
}

pub fn random_block<R: Rng>(rng: &mut R) -> Vec<u8> {
    rng.gen_iter::<u8>().take(BLOCK_SIZE).collect()
}

fn check_key(key: &[u8]) -> Result<(), Error> {
    if key.len() != BLOCK_SIZE {
        return Err(CipherError::InvalidKeyLength {
            expected: BLOCK_SIZE,
            actual: key.len(),
        }
        .into());
    }
    Ok(())
}

fn check_aligned(len: usize) -> Result<(), Error> {
    if len % BLOCK_SIZE != 0 {
        return Err(CipherError::InvalidBlockAlignment { len }.into());
    }
    Ok(())
}

fn require_iv<'a>(iv: Option<&'a [u8]>, expected: usize) -> Result<&'a [u8], Error> {
    match iv {
        Some(seed) if seed.len() == expected => Ok(seed),
        Some(seed) => Err(CipherError::InvalidIvLength {
            expected,
            actual: seed.len(),
        }
        .into()),
        None => bail!("mode requires a chaining seed"),
    }
}

// Raw AES-128 with openssl's own padding disabled; the input must already
// be block aligned.
fn aes128_raw(key: &[u8], input: &[u8], direction: symm::Mode) -> Result<Vec<u8>, Error> {
    let cipher = symm::Cipher::aes_128_ecb();
    let mut crypter = symm::Crypter::new(cipher, direction, key, None)
        .map_err(|e| CipherError::BlockCipherFailed { reason: e.to_string() })?;
    crypter.pad(false);

    let mut output = vec![0; input.len() + cipher.block_size()];
    let mut n = crypter
        .update(input, &mut output)
        .map_err(|e| CipherError::BlockCipherFailed { reason: e.to_string() })?;
    n += crypter
        .finalize(&mut output[n..])
        .map_err(|e| CipherError::BlockCipherFailed { reason: e.to_string() })?;
    output.truncate(n);
    Ok(output)
}

pub fn encrypt_block(key: &[u8], block: &[u8]) -> Result<Vec<u8>, Error> {
    check_key(key)?;
    if block.len() != BLOCK_SIZE {
        return Err(CipherError::InvalidBlockAlignment { len: block.len() }.into());
    }
    aes128_raw(key, block, symm::Mode::Encrypt)
}

pub fn decrypt_block(key: &[u8], block: &[u8]) -> Result<Vec<u8>, Error> {
    check_key(key)?;
    if block.len() != BLOCK_SIZE {
        return Err(CipherError::InvalidBlockAlignment { len: block.len() }.into());
    }
    aes128_raw(key, block, symm::Mode::Decrypt)
}

fn cbc_encrypt(key: &[u8], iv: &[u8], cleartext: &[u8]) -> Result<Vec<u8>, Error> {
    let padded = pad(cleartext, BLOCK_SIZE as u8)?;
    let mut ciphertext = Vec::with_capacity(padded.len());
    let mut chain = iv.to_vec();
    for block in padded.chunks(BLOCK_SIZE) {
        chain = encrypt_block(key, &block.xor(&chain))?;
        ciphertext.extend_from_slice(&chain);
    }
    Ok(ciphertext)
}

fn counter_block(nonce: &[u8], index: u64) -> Vec<u8> {
    let mut block = nonce.to_vec();
    block.extend_from_slice(&index.to_le_bytes());
    block
}

// Encryption and decryption are the same operation in counter mode.
fn ctr_apply(key: &[u8], nonce: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
    let mut output = Vec::with_capacity(input.len());
    for (i, chunk) in input.chunks(BLOCK_SIZE).enumerate() {
        let keystream = encrypt_block(key, &counter_block(nonce, i as u64))?;
        output.extend_from_slice(&chunk.xor(&keystream));
    }
    Ok(output)
}

/// Rewrites `ciphertext` so that it decrypts to `newtext` at `offset`,
/// recomputing only the keystream blocks the edit overlaps. The rest of the
/// ciphertext is returned untouched.
pub fn ctr_edit(
    ciphertext: &[u8],
    key: &[u8],
    nonce: &[u8],
    offset: usize,
    newtext: &[u8],
) -> Result<Vec<u8>, Error> {
    check_key(key)?;
    ensure!(nonce.len() == NONCE_SIZE, "nonce must consist of {} bytes", NONCE_SIZE);

    let end = offset + newtext.len();
    ensure!(end <= ciphertext.len(), "edit range out of bounds");

    let mut output = ciphertext.to_vec();
    if newtext.is_empty() {
        return Ok(output);
    }

    let first_block = offset / BLOCK_SIZE;
    let last_block = (end - 1) / BLOCK_SIZE;
    let mut keystream = Vec::with_capacity((last_block - first_block + 1) * BLOCK_SIZE);
    for i in first_block..=last_block {
        keystream.extend_from_slice(&encrypt_block(key, &counter_block(nonce, i as u64))?);
    }

    for (j, &u) in newtext.iter().enumerate() {
        output[offset + j] = u ^ keystream[offset + j - first_block * BLOCK_SIZE];
    }
    Ok(output)
}

/// The mode engine, hung off `[u8]` so call sites read
/// `cleartext.encrypt(&key, Some(&iv), Mode::Cbc)`.
///
/// The `iv` parameter carries the chaining seed: a block-sized IV for CBC,
/// a half-block nonce for CTR, nothing for ECB.
pub trait Aes128Mode {
    fn encrypt(&self, key: &Self, iv: Option<&Self>, mode: Mode) -> Result<Vec<u8>, Error>;
    fn decrypt(&self, key: &Self, iv: Option<&Self>, mode: Mode) -> Result<Vec<u8>, Error>;
    fn decrypt_cbc_keep_padding(&self, key: &Self, iv: &Self) -> Result<Vec<u8>, Error>;
}

impl Aes128Mode for [u8] {
    fn encrypt(&self, key: &[u8], iv: Option<&[u8]>, mode: Mode) -> Result<Vec<u8>, Error> {
        check_key(key)?;
        match mode {
            Mode::Ecb => {
                ensure!(iv.is_none(), "an iv is not used in codebook mode");
                aes128_raw(key, &pad(self, BLOCK_SIZE as u8)?, symm::Mode::Encrypt)
            }
            Mode::Cbc => cbc_encrypt(key, require_iv(iv, BLOCK_SIZE)?, self),
            Mode::Ctr => ctr_apply(key, require_iv(iv, NONCE_SIZE)?, self),
        }
    }

    fn decrypt(&self, key: &[u8], iv: Option<&[u8]>, mode: Mode) -> Result<Vec<u8>, Error> {
        check_key(key)?;
        match mode {
            Mode::Ecb => {
                ensure!(iv.is_none(), "an iv is not used in codebook mode");
                check_aligned(self.len())?;
                let mut cleartext = aes128_raw(key, self, symm::Mode::Decrypt)?;
                unpad_inplace(&mut cleartext, BLOCK_SIZE as u8)?;
                Ok(cleartext)
            }
            Mode::Cbc => {
                let mut cleartext =
                    self.decrypt_cbc_keep_padding(key, require_iv(iv, BLOCK_SIZE)?)?;
                unpad_inplace(&mut cleartext, BLOCK_SIZE as u8)?;
                Ok(cleartext)
            }
            Mode::Ctr => ctr_apply(key, require_iv(iv, NONCE_SIZE)?, self),
        }
    }

    /// CBC chain walk without the final padding strip. Predicate servers use
    /// this to inspect raw trailing bytes.
    fn decrypt_cbc_keep_padding(&self, key: &[u8], iv: &[u8]) -> Result<Vec<u8>, Error> {
        check_key(key)?;
        ensure!(iv.len() == BLOCK_SIZE, "iv must consist of {} bytes", BLOCK_SIZE);
        check_aligned(self.len())?;

        let mut cleartext = Vec::with_capacity(self.len());
        let mut chain = iv;
        for block in self.chunks(BLOCK_SIZE) {
            cleartext.extend_from_slice(&decrypt_block(key, block)?.xor(chain));
            chain = block;
        }
        Ok(cleartext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialize::from_base64;

    #[test]
    fn pkcs7_pads_to_block_length_twenty() {
        let padded = pad(b"YELLOW SUBMARINE", 20).unwrap();
        assert_eq!(b"YELLOW SUBMARINE\x04\x04\x04\x04".to_vec(), padded);

        let mut stripped = padded;
        unpad_inplace(&mut stripped, 20).unwrap();
        assert_eq!(b"YELLOW SUBMARINE".to_vec(), stripped);
    }

    #[test]
    fn aligned_message_gains_a_full_padding_block() {
        let padded = pad(b"YELLOW SUBMARINE", BLOCK_SIZE as u8).unwrap();
        assert_eq!(2 * BLOCK_SIZE, padded.len());
        assert!(padded[BLOCK_SIZE..].iter().all(|&b| b == BLOCK_SIZE as u8));
    }

    #[test]
    fn padding_validation_vectors() {
        assert!(padding_valid(b"ICE ICE BABY\x04\x04\x04\x04", 16).unwrap());
        assert!(!padding_valid(b"ICE ICE BABY\x05\x05\x05\x05", 16).unwrap());
        assert!(!padding_valid(b"ICE ICE BABY\x01\x02\x03\x04", 16).unwrap());
        assert!(!padding_valid(b"ICE ICE BABY\x03\x03\x03", 16).unwrap());
        // A zero last byte is out of the 1..=k range.
        assert!(!padding_valid(b"ICE ICE BABY AB\x00", 16).unwrap());
        assert!(padding_valid(b"ICE ICE BABY\x0C\x0C\x0C\x0C\x0C\x0C\x0C\x0C\x0C\x0C\x0C\x0C", 12).unwrap());
    }

    #[test]
    fn strip_failure_is_typed() {
        let mut u = b"ICE ICE BABY\x05\x05\x05\x05".to_vec();
        let err = unpad_inplace(&mut u, 16).unwrap_err();
        match err.downcast::<CipherError>().unwrap() {
            CipherError::InvalidPadding => {}
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn round_trips_in_all_modes() {
        let mut rng = rand::thread_rng();
        let key = random_block(&mut rng);
        let iv = random_block(&mut rng);
        let nonce = vec![0; NONCE_SIZE];

        for msg in &[&b""[..], &b"x"[..], &b"exactly 16 bytes"[..], &b"a somewhat longer message spanning several blocks"[..]] {
            let ecb = msg.encrypt(&key, None, Mode::Ecb).unwrap();
            assert_eq!(msg.to_vec(), ecb.decrypt(&key, None, Mode::Ecb).unwrap());

            let cbc = msg.encrypt(&key, Some(&iv), Mode::Cbc).unwrap();
            assert_eq!(msg.to_vec(), cbc.decrypt(&key, Some(&iv), Mode::Cbc).unwrap());

            let ctr = msg.encrypt(&key, Some(&nonce), Mode::Ctr).unwrap();
            assert_eq!(msg.len(), ctr.len());
            assert_eq!(msg.to_vec(), ctr.decrypt(&key, Some(&nonce), Mode::Ctr).unwrap());
        }
    }

    #[test]
    fn ecb_is_deterministic_per_block() {
        let mut rng = rand::thread_rng();
        let key = random_block(&mut rng);
        let ciphertext = b"YELLOW SUBMARINEYELLOW SUBMARINE"
            .encrypt(&key, None, Mode::Ecb)
            .unwrap();
        assert_eq!(ciphertext[..BLOCK_SIZE], ciphertext[BLOCK_SIZE..2 * BLOCK_SIZE]);
    }

    #[test]
    fn cbc_chaining_breaks_block_determinism() {
        let mut rng = rand::thread_rng();
        let key = random_block(&mut rng);
        let iv = random_block(&mut rng);
        let ciphertext = b"YELLOW SUBMARINEYELLOW SUBMARINE"
            .encrypt(&key, Some(&iv), Mode::Cbc)
            .unwrap();
        assert_ne!(ciphertext[..BLOCK_SIZE], ciphertext[BLOCK_SIZE..2 * BLOCK_SIZE]);
    }

    #[test]
    fn cbc_bit_flips_travel_one_block_forward() {
        let mut rng = rand::thread_rng();
        let key = random_block(&mut rng);
        let iv = random_block(&mut rng);
        let cleartext = b"first block 16b second block16b third block 16b.";
        let mut ciphertext = cleartext.encrypt(&key, Some(&iv), Mode::Cbc).unwrap();

        ciphertext[3] ^= 0x20;
        let garbled = ciphertext.decrypt_cbc_keep_padding(&key, &iv).unwrap();
        // Same bit, one block later; the flipped block itself is shredded.
        assert_eq!(cleartext[BLOCK_SIZE + 3] ^ 0x20, garbled[BLOCK_SIZE + 3]);
        assert_ne!(cleartext[..BLOCK_SIZE], garbled[..BLOCK_SIZE]);
        assert_eq!(cleartext[2 * BLOCK_SIZE..], garbled[2 * BLOCK_SIZE..cleartext.len()]);
    }

    #[test]
    fn ctr_matches_reference_vector() {
        let ciphertext = from_base64(
            "L77na/nrFsKvynd6HzOoG7GHTLXsTVu9qvY/2syLXzhPweyyMTJULu/6/kXX0KSvoOLSFQ==",
        )
        .unwrap();
        let cleartext = ciphertext
            .decrypt(b"YELLOW SUBMARINE", Some(&[0; NONCE_SIZE]), Mode::Ctr)
            .unwrap();
        assert_eq!(
            b"Yo, VIP Let's kick it Ice, Ice, baby Ice, Ice, baby ".to_vec(),
            cleartext
        );
    }

    #[test]
    fn ctr_edit_splices_without_touching_the_rest() {
        let mut rng = rand::thread_rng();
        let key = random_block(&mut rng);
        let nonce: Vec<u8> = (0..NONCE_SIZE as u8).collect();
        let cleartext = b"one two three four five six seven eight nine ten".to_vec();
        let ciphertext = cleartext.encrypt(&key, Some(&nonce), Mode::Ctr).unwrap();

        let edited = ctr_edit(&ciphertext, &key, &nonce, 35, b"spongebob").unwrap();

        let mut expected_clear = cleartext.clone();
        expected_clear[35..35 + 9].copy_from_slice(b"spongebob");
        let expected = expected_clear.encrypt(&key, Some(&nonce), Mode::Ctr).unwrap();
        assert_eq!(expected, edited);
        assert_eq!(ciphertext[..35], edited[..35]);
        assert_eq!(ciphertext[35 + 9..], edited[35 + 9..]);

        assert!(ctr_edit(&ciphertext, &key, &nonce, cleartext.len(), b"x").is_err());
    }

    #[test]
    fn configuration_errors_are_typed() {
        let short_key = vec![0; 7];
        let err = b"message".encrypt(&short_key, None, Mode::Ecb).unwrap_err();
        match err.downcast::<CipherError>().unwrap() {
            CipherError::InvalidKeyLength { expected: 16, actual: 7 } => {}
            other => panic!("unexpected error: {}", other),
        }

        let key = vec![0; BLOCK_SIZE];
        let err = [0u8; 17].decrypt(&key, None, Mode::Ecb).unwrap_err();
        match err.downcast::<CipherError>().unwrap() {
            CipherError::InvalidBlockAlignment { len: 17 } => {}
            other => panic!("unexpected error: {}", other),
        }
    }
}
