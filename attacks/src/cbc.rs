//! Attacks on chained-block mode: bit-flip forgery, key recovery from a
//! key-as-IV misconfiguration, and the adaptive padding oracle.

use std::cell::Cell;
use std::cmp;

use rand::Rng;

use blockmodes::{
    padding_valid, random_block, unpad_inplace, Aes128Mode, Mode, BLOCK_SIZE,
};
use serialize::from_base64;
use xor::Xor;

use crate::errors::*;
use crate::helper::ceil_div;
use crate::oracles::{CookieOracle, DeterministicOracle, Oracle};

// Number of leading ciphertext blocks fully occupied by the prefix,
// counted from where two different inputs first disagree.
fn full_prefix_blocks<T: DeterministicOracle>(oracle: &T) -> Result<usize> {
    match oracle
        .encrypt(&[0])?
        .chunks(BLOCK_SIZE)
        .zip(oracle.encrypt(&[1])?.chunks(BLOCK_SIZE))
        .position(|(x, y)| x != y)
    {
        Some(n) => Ok(n),
        None => bail!("oracle output does not depend on its input"),
    }
}

/// Prefix length measured without assuming block independence: every
/// comparison involves only ciphertexts whose leading plaintext blocks are
/// identical, so it also holds under chaining.
///
/// A constant block is fed in and shrunk one byte at a time, which moves
/// the suffix left; the watched block changes exactly when the first
/// suffix byte enters it. Two fill constants guard against that suffix
/// byte colliding with the fill.
pub fn prefix_length<T: DeterministicOracle>(oracle: &T) -> Result<usize> {
    let n = full_prefix_blocks(oracle)?;
    let leak_point = |fill: u8| -> Result<usize> {
        let constant = vec![fill; BLOCK_SIZE];
        let mut prev = oracle.encrypt(&constant)?;
        for i in 0..BLOCK_SIZE {
            let cur = oracle.encrypt(&constant[i + 1..])?;
            if prev.chunks(BLOCK_SIZE).nth(n) != cur.chunks(BLOCK_SIZE).nth(n) {
                return Ok(i);
            }
            prev = cur;
        }
        Ok(BLOCK_SIZE)
    };
    Ok(n * BLOCK_SIZE + cmp::min(leak_point(0)?, leak_point(1)?))
}

/// Bit-flip forgery: the input carries placeholder bytes one below each
/// reserved delimiter, and the low bit of the corresponding positions one
/// ciphertext block earlier is flipped. After decryption the placeholders
/// become the real delimiters, while the block wearing the flips shreds
/// into garbage inside the already-spent prefix field.
pub fn forge_admin_cookie(oracle: &CookieOracle) -> Result<Vec<u8>> {
    let prefix_len = prefix_length(oracle)?;
    let (prefix_blocks, shim_len) = ceil_div(prefix_len, BLOCK_SIZE);
    ensure!(
        prefix_blocks >= 1,
        "no ciphertext block in front of the injection point"
    );

    // One below b';' and b'=', so the sanitizer waves them through.
    let placeholder = b":admin<true:";
    let mut input = vec![0; shim_len];
    input.extend_from_slice(placeholder);
    let mut ciphertext = oracle.encrypt(&input)?;

    for (i, &c) in placeholder.iter().enumerate() {
        if c == b':' || c == b'<' {
            ciphertext[(prefix_blocks - 1) * BLOCK_SIZE + i] ^= 1;
        }
    }
    Ok(ciphertext)
}

/// Fault raised by [`Receiver`] when a decrypted token fails the ASCII
/// compliance check. It carries the decrypted bytes, which is exactly the
/// leak the key-recovery attack needs.
#[derive(Debug, Fail)]
#[fail(display = "plaintext failed the ascii compliance check")]
pub struct RejectedPlaintext(pub Vec<u8>);

pub struct Sender {
    key: Vec<u8>,
}

pub struct Receiver {
    key: Vec<u8>,
}

/// A sender/receiver pair sharing one secret key that is also, wrongly,
/// used as the CBC initialization vector.
pub fn key_as_iv_pair<R: Rng>(rng: &mut R) -> (Sender, Receiver) {
    let key = random_block(rng);
    (Sender { key: key.clone() }, Receiver { key })
}

impl Sender {
    pub fn issue_token(&self) -> Result<Vec<u8>> {
        let cleartext: &[u8] =
            b"comment1=cooking%20MCs;userdata=foo@baz.com;comment2=%20like%20a%20pound%20of%20bacon";
        cleartext.encrypt(&self.key, Some(&self.key), Mode::Cbc)
    }
}

impl Receiver {
    pub fn consume_token(&self, ciphertext: &[u8]) -> Result<()> {
        let cleartext = ciphertext.decrypt(&self.key, Some(&self.key), Mode::Cbc)?;
        if !cleartext.is_ascii() {
            return Err(RejectedPlaintext(cleartext).into());
        }
        Ok(())
    }

    pub fn verify_key(&self, candidate: &[u8]) -> Result<()> {
        compare_eq(&self.key[..], candidate)
    }
}

/// Key recovery under IV = key. In the forged message `C1 || 0 || C1 ...`
/// block one decrypts to `P1` and block three to `P1 xor key`, so the
/// leaked plaintext cancels down to the key.
pub fn recover_key_from_reused_iv(sender: &Sender, receiver: &Receiver) -> Result<Vec<u8>> {
    let ciphertext = sender.issue_token()?;
    ensure!(
        ciphertext.len() >= 3 * BLOCK_SIZE,
        "token too short to forge with"
    );

    let mut forged = Vec::with_capacity(5 * BLOCK_SIZE);
    forged.extend_from_slice(&ciphertext[..BLOCK_SIZE]);
    forged.extend_from_slice(&[0; BLOCK_SIZE]);
    forged.extend_from_slice(&ciphertext[..BLOCK_SIZE]);
    // Carry over the final blocks so the padding check still passes.
    forged.extend_from_slice(&ciphertext[ciphertext.len() - 2 * BLOCK_SIZE..]);

    match receiver.consume_token(&forged) {
        Ok(()) => bail!("forged token passed the compliance check"),
        Err(err) => match err.downcast::<RejectedPlaintext>() {
            Ok(RejectedPlaintext(leaked)) => {
                Ok(leaked[..BLOCK_SIZE].xor(&leaked[2 * BLOCK_SIZE..3 * BLOCK_SIZE]))
            }
            Err(other) => Err(other),
        },
    }
}

/// The single-bit query surface of a padding-validation server: one
/// `(previous block, block)` pair in, one bit out. A networked deployment
/// would implement this same trait over a round trip.
pub trait PaddingOracle {
    fn padding_valid(&self, prev: &[u8], block: &[u8]) -> Result<bool>;
}

// Session tokens the server may hand out; one is picked per instance.
const SESSION_TOKENS: [&str; 10] = [
    "MDAwMDAwTm93IHRoYXQgdGhlIHBhcnR5IGlzIGp1bXBpbmc=",
    "MDAwMDAxV2l0aCB0aGUgYmFzcyBraWNrZWQgaW4gYW5kIHRoZSBWZWdhJ3MgYXJlIHB1bXBpbic=",
    "MDAwMDAyUXVpY2sgdG8gdGhlIHBvaW50LCB0byB0aGUgcG9pbnQsIG5vIGZha2luZw==",
    "MDAwMDAzQ29va2luZyBNQydzIGxpa2UgYSBwb3VuZCBvZiBiYWNvbg==",
    "MDAwMDA0QnVybmluZyAnZW0sIGlmIHlvdSBhaW4ndCBxdWljayBhbmQgbmltYmxl",
    "MDAwMDA1SSBnbyBjcmF6eSB3aGVuIEkgaGVhciBhIGN5bWJhbA==",
    "MDAwMDA2QW5kIGEgaGlnaCBoYXQgd2l0aCBhIHNvdXBlZCB1cCB0ZW1wbw==",
    "MDAwMDA3SSdtIG9uIGEgcm9sbCwgaXQncyB0aW1lIHRvIGdvIHNvbG8=",
    "MDAwMDA4b2xsaW4nIGluIG15IGZpdmUgcG9pbnQgb2g=",
    "MDAwMDA5aXRoIG15IHJhZy10b3AgZG93biBzbyBteSBoYWlyIGNhbiBibG93",
];

pub struct PaddingOracleServer {
    key: Vec<u8>,
    iv: Vec<u8>,
    secret: Vec<u8>,
}

impl PaddingOracleServer {
    pub fn new<R: Rng>(rng: &mut R) -> Result<Self> {
        let pick = rng.gen_range(0, SESSION_TOKENS.len());
        let secret = from_base64(SESSION_TOKENS[pick])?;
        Ok(PaddingOracleServer::with_secret(rng, secret))
    }

    /// Server around a caller-chosen secret; the property tests use this
    /// to pin down plaintexts with adversarial trailing bytes.
    pub fn with_secret<R: Rng>(rng: &mut R, secret: Vec<u8>) -> Self {
        PaddingOracleServer {
            key: random_block(rng),
            iv: random_block(rng),
            secret,
        }
    }

    /// The encrypted session token together with its public iv.
    pub fn token(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let ciphertext = self.secret.encrypt(&self.key, Some(&self.iv), Mode::Cbc)?;
        Ok((self.iv.clone(), ciphertext))
    }

    pub fn verify_secret(&self, candidate: &[u8]) -> Result<()> {
        compare_eq(&self.secret[..], candidate)
    }
}

impl PaddingOracle for PaddingOracleServer {
    fn padding_valid(&self, prev: &[u8], block: &[u8]) -> Result<bool> {
        let cleartext = block.decrypt_cbc_keep_padding(&self.key, prev)?;
        padding_valid(&cleartext, BLOCK_SIZE as u8)
    }
}

// Safety guard around the oracle: a run that needs more queries than this
// is a bug in the attack or a misbehaving oracle, not slow progress.
struct MeteredOracle<'a, T: PaddingOracle> {
    oracle: &'a T,
    budget: usize,
    spent: Cell<usize>,
}

impl<'a, T: PaddingOracle> MeteredOracle<'a, T> {
    fn padding_valid(&self, prev: &[u8], block: &[u8]) -> Result<bool> {
        let spent = self.spent.get() + 1;
        if spent > self.budget {
            return Err(AttackError::QueryBudgetExceeded { budget: self.budget }.into());
        }
        self.spent.set(spent);
        self.oracle.padding_valid(prev, block)
    }
}

/// Adaptive padding-oracle decryption of `ciphertext` (with `iv` standing
/// in as the zeroth block), one block at a time, last byte first.
///
/// At trailing offset `d` every already-recovered position of a mutable
/// copy of the previous block is steered to decrypt to `d + 1`, then the
/// next position is brute-forced. A match on the very last byte may be an
/// accident of the real plaintext's own trailing bytes, so it is confirmed
/// by disturbing the next-to-last position and asking again; a match that
/// fails confirmation just resumes the candidate scan.
pub fn decrypt_with_padding_oracle<T: PaddingOracle>(
    oracle: &T,
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    ensure!(iv.len() == BLOCK_SIZE, "iv must be a single block");
    ensure!(
        !ciphertext.is_empty() && ciphertext.len() % BLOCK_SIZE == 0,
        "ciphertext must be a positive number of whole blocks"
    );

    let oracle = MeteredOracle {
        oracle,
        budget: (ciphertext.len() + BLOCK_SIZE) * 256 * 2,
        spent: Cell::new(0),
    };

    let mut cleartext = vec![0; ciphertext.len()];
    let mut prev = iv.to_vec();
    for (block_index, block) in ciphertext.chunks(BLOCK_SIZE).enumerate() {
        let block_offset = block_index * BLOCK_SIZE;
        let mut forged = prev.clone();
        for i in (0..BLOCK_SIZE).rev() {
            let padding = (BLOCK_SIZE - i) as u8;
            // Re-steer the already-solved tail to the new padding value.
            forged[i + 1..].xor_inplace(&[(padding - 1) ^ padding]);

            let mut found = None;
            let mut saw_ambiguous = false;
            for delta in 0u8..=255 {
                forged[i] ^= delta;
                let mut valid = oracle.padding_valid(&forged, block)?;
                if valid && i == BLOCK_SIZE - 1 {
                    // Could be the plaintext's own trailing run (e.g.
                    // ... 02 02). Break the run one position earlier and ask
                    // again; only a forced 01 survives that.
                    forged[i - 1] ^= 1;
                    valid = oracle.padding_valid(&forged, block)?;
                    forged[i - 1] ^= 1;
                    if !valid {
                        saw_ambiguous = true;
                    }
                }
                if valid {
                    found = Some(delta);
                    break;
                }
                forged[i] ^= delta;
            }

            match found {
                Some(delta) => cleartext[block_offset + i] = padding ^ delta,
                None => {
                    let position = block_offset + i;
                    return Err(if saw_ambiguous {
                        AttackError::AmbiguousPaddingMatch { position }.into()
                    } else {
                        AttackError::OracleExhausted { position }.into()
                    });
                }
            }
        }
        prev = block.to_vec();
    }

    unpad_inplace(&mut cleartext, BLOCK_SIZE as u8)?;
    Ok(cleartext)
}

pub fn run_cookie_forgery() -> Result<()> {
    let mut rng = rand::thread_rng();
    let oracle = CookieOracle::new(&mut rng)?;
    compare_eq(false, oracle.is_admin(&oracle.encrypt(b";admin=true")?)?)?;
    compare_eq(true, oracle.is_admin(&forge_admin_cookie(&oracle)?)?)
}

pub fn run_key_recovery() -> Result<()> {
    let mut rng = rand::thread_rng();
    let (sender, receiver) = key_as_iv_pair(&mut rng);
    let key = recover_key_from_reused_iv(&sender, &receiver)?;
    receiver.verify_key(&key)
}

pub fn run_padding_oracle() -> Result<()> {
    let mut rng = rand::thread_rng();
    let server = PaddingOracleServer::new(&mut rng)?;
    let (iv, ciphertext) = server.token()?;
    let recovered = decrypt_with_padding_oracle(&server, &iv, &ciphertext)?;
    server.verify_secret(&recovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forges_admin_cookie() {
        run_cookie_forgery().unwrap();
    }

    #[test]
    fn recovers_key_reused_as_iv() {
        run_key_recovery().unwrap();
    }

    #[test]
    fn padding_oracle_recovers_a_session_token() {
        run_padding_oracle().unwrap();
    }

    #[test]
    fn padding_oracle_handles_adversarial_trailing_bytes() {
        let mut rng = rand::thread_rng();
        let secrets: Vec<Vec<u8>> = vec![
            b"ends in one\x01".to_vec(),
            b"ends in twos\x02\x02".to_vec(),
            b"\x03\x03\x03".to_vec(),
            vec![2; 16],
            b"a plain sentence.".to_vec(),
        ];
        for secret in secrets {
            let server = PaddingOracleServer::with_secret(&mut rng, secret.clone());
            let (iv, ciphertext) = server.token().unwrap();
            let recovered = decrypt_with_padding_oracle(&server, &iv, &ciphertext).unwrap();
            assert_eq!(secret, recovered);
        }
    }

    #[test]
    fn padding_oracle_rejects_misaligned_input() {
        let mut rng = rand::thread_rng();
        let server = PaddingOracleServer::with_secret(&mut rng, b"x".to_vec());
        let (iv, _) = server.token().unwrap();
        assert!(decrypt_with_padding_oracle(&server, &iv, &[0; 17]).is_err());
    }
}
