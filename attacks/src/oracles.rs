//! The victim side: encryption oracles holding a secret key behind a
//! narrow query surface.
//!
//! Every oracle is an immutable configuration value: key, chaining seed,
//! injection template and mode are all drawn from the caller-supplied
//! generator at construction time and never change afterwards, so an
//! instance can be shared and queried freely. Secrets only ever leave
//! through `verify_*`, which the attacks call once at the very end to
//! check their answer.

use rand::Rng;

use blockmodes::{random_block, Aes128Mode, Mode, NONCE_SIZE};
use serialize::from_base64;

use crate::errors::*;
use crate::form;

// "Rollin' in my 5.0 / With my rag-top down ..."
const SECRET_SUFFIX: &str =
    "Um9sbGluJyBpbiBteSA1LjAKV2l0aCBteSByYWctdG9wIGRv\
     d24gc28gbXkgaGFpciBjYW4gYmxvdwpUaGUgZ2lybGllcyBvb\
     iBzdGFuZGJ5IHdhdmluZyBqdXN0IHRvIHNheSBoaQpEaWQgeW\
     91IHN0b3A/IE5vLCBJIGp1c3QgZHJvdmUgYnkK";

const COOKIE_PREFIX: &[u8] = b"comment1=cooking%20MCs;userdata=";
const COOKIE_SUFFIX: &[u8] = b";comment2=%20like%20a%20pound%20of%20bacon";

/// The attacker-facing query surface shared by the encryption oracles.
pub trait Oracle {
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>>;
    fn verify_suffix(&self, candidate: &[u8]) -> Result<()>;
}

/// Marker for oracles whose ciphertext is a pure function of the attacker
/// input; the length- and prefix-measuring probes require this.
pub trait DeterministicOracle: Oracle {}

struct Common {
    key: Vec<u8>,
    seed: Vec<u8>,
    prefix: Vec<u8>,
    suffix: Vec<u8>,
    mode: Mode,
}

impl Common {
    fn new<R: Rng>(rng: &mut R, mode: Mode, prefix: Vec<u8>, suffix: Vec<u8>) -> Self {
        let seed = match mode {
            Mode::Ecb => Vec::new(),
            Mode::Cbc => random_block(rng),
            Mode::Ctr => rng.gen_iter::<u8>().take(NONCE_SIZE).collect(),
        };
        Common {
            key: random_block(rng),
            seed,
            prefix,
            suffix,
            mode,
        }
    }

    fn chain_seed(&self) -> Option<&[u8]> {
        match self.mode {
            Mode::Ecb => None,
            _ => Some(&self.seed),
        }
    }

    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut cleartext =
            Vec::with_capacity(self.prefix.len() + input.len() + self.suffix.len());
        cleartext.extend_from_slice(&self.prefix);
        cleartext.extend_from_slice(input);
        cleartext.extend_from_slice(&self.suffix);
        cleartext.encrypt(&self.key, self.chain_seed(), self.mode)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        ciphertext.decrypt(&self.key, self.chain_seed(), self.mode)
    }

    fn verify_suffix(&self, candidate: &[u8]) -> Result<()> {
        compare_eq(&self.suffix[..], candidate)
    }
}

/// Encrypts under a mode drawn at construction time; the mode-detection
/// attack has to tell which one it got.
pub struct HiddenModeOracle {
    common: Common,
}

impl HiddenModeOracle {
    pub fn new<R: Rng>(rng: &mut R) -> Result<Self> {
        let mode = if rng.gen() { Mode::Ecb } else { Mode::Cbc };
        let prefix_len = rng.gen_range(5, 11);
        let prefix = rng.gen_iter::<u8>().take(prefix_len).collect();
        let suffix_len = rng.gen_range(5, 11);
        let suffix = rng.gen_iter::<u8>().take(suffix_len).collect();
        Ok(HiddenModeOracle {
            common: Common::new(rng, mode, prefix, suffix),
        })
    }

    pub fn verify_mode(&self, candidate: Mode) -> Result<()> {
        compare_eq(self.common.mode, candidate)
    }
}

impl Oracle for HiddenModeOracle {
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.common.encrypt(input)
    }

    fn verify_suffix(&self, candidate: &[u8]) -> Result<()> {
        self.common.verify_suffix(candidate)
    }
}

/// Codebook mode with a fixed secret suffix appended to every input.
pub struct SuffixOracle {
    common: Common,
}

impl SuffixOracle {
    pub fn new<R: Rng>(rng: &mut R) -> Result<Self> {
        let suffix = from_base64(SECRET_SUFFIX)?;
        Ok(SuffixOracle {
            common: Common::new(rng, Mode::Ecb, Vec::new(), suffix),
        })
    }
}

impl Oracle for SuffixOracle {
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.common.encrypt(input)
    }

    fn verify_suffix(&self, candidate: &[u8]) -> Result<()> {
        self.common.verify_suffix(candidate)
    }
}

impl DeterministicOracle for SuffixOracle {}

/// Same secret suffix, but the input is additionally pushed out of
/// alignment by a random prefix of up to 63 random bytes.
pub struct PrefixSuffixOracle {
    common: Common,
}

impl PrefixSuffixOracle {
    pub fn new<R: Rng>(rng: &mut R) -> Result<Self> {
        let prefix_len = rng.gen_range(0, 64);
        let prefix = rng.gen_iter::<u8>().take(prefix_len).collect();
        let suffix = from_base64(SECRET_SUFFIX)?;
        Ok(PrefixSuffixOracle {
            common: Common::new(rng, Mode::Ecb, prefix, suffix),
        })
    }
}

impl Oracle for PrefixSuffixOracle {
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.common.encrypt(input)
    }

    fn verify_suffix(&self, candidate: &[u8]) -> Result<()> {
        self.common.verify_suffix(candidate)
    }
}

impl DeterministicOracle for PrefixSuffixOracle {}

/// Encrypted `email=<input>&uid=10&role=user` profiles. Reserved `&` and
/// `=` are stripped from the input before encoding.
pub struct ProfileOracle {
    common: Common,
}

impl ProfileOracle {
    pub fn new<R: Rng>(rng: &mut R) -> Result<Self> {
        Ok(ProfileOracle {
            common: Common::new(
                rng,
                Mode::Ecb,
                b"email=".to_vec(),
                b"&uid=10&role=user".to_vec(),
            ),
        })
    }

    /// One bit out: does the profile behind `ciphertext` carry the admin
    /// role. The profile itself never leaves the oracle.
    pub fn is_admin(&self, ciphertext: &[u8]) -> Result<bool> {
        let profile = self.common.decrypt(ciphertext)?;
        Ok(form::field(&form::decode(&profile, b'&'), b"role") == Some(&b"admin"[..]))
    }
}

impl Oracle for ProfileOracle {
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.common.encrypt(&form::strip_metachars(input, b"&="))
    }

    fn verify_suffix(&self, candidate: &[u8]) -> Result<()> {
        self.common.verify_suffix(candidate)
    }
}

impl DeterministicOracle for ProfileOracle {}

/// Chained-block cookies: attacker input lands between two fixed comment
/// fields, with reserved `;` and `=` quoted away.
pub struct CookieOracle {
    common: Common,
}

impl CookieOracle {
    pub fn new<R: Rng>(rng: &mut R) -> Result<Self> {
        Ok(CookieOracle {
            common: Common::new(rng, Mode::Cbc, COOKIE_PREFIX.to_vec(), COOKIE_SUFFIX.to_vec()),
        })
    }

    pub fn is_admin(&self, ciphertext: &[u8]) -> Result<bool> {
        let cookie = self.common.decrypt(ciphertext)?;
        Ok(form::field(&form::decode(&cookie, b';'), b"admin") == Some(&b"true"[..]))
    }
}

impl Oracle for CookieOracle {
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.common.encrypt(&form::quote_metachars(input, b";="))
    }

    fn verify_suffix(&self, candidate: &[u8]) -> Result<()> {
        self.common.verify_suffix(candidate)
    }
}

impl DeterministicOracle for CookieOracle {}

/// The same cookie template under counter mode.
pub struct CtrCookieOracle {
    common: Common,
}

impl CtrCookieOracle {
    pub fn new<R: Rng>(rng: &mut R) -> Result<Self> {
        Ok(CtrCookieOracle {
            common: Common::new(rng, Mode::Ctr, COOKIE_PREFIX.to_vec(), COOKIE_SUFFIX.to_vec()),
        })
    }

    pub fn is_admin(&self, ciphertext: &[u8]) -> Result<bool> {
        let cookie = self.common.decrypt(ciphertext)?;
        Ok(form::field(&form::decode(&cookie, b';'), b"admin") == Some(&b"true"[..]))
    }
}

impl Oracle for CtrCookieOracle {
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.common.encrypt(&form::quote_metachars(input, b";="))
    }

    fn verify_suffix(&self, candidate: &[u8]) -> Result<()> {
        self.common.verify_suffix(candidate)
    }
}

impl DeterministicOracle for CtrCookieOracle {}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, XorShiftRng};

    #[test]
    fn seeded_oracles_are_reproducible() {
        let mut first_rng = XorShiftRng::from_seed([7, 11, 13, 17]);
        let mut second_rng = XorShiftRng::from_seed([7, 11, 13, 17]);
        let first = SuffixOracle::new(&mut first_rng).unwrap();
        let second = SuffixOracle::new(&mut second_rng).unwrap();
        assert_eq!(
            first.encrypt(b"probe").unwrap(),
            second.encrypt(b"probe").unwrap()
        );
    }

    #[test]
    fn suffix_oracle_appends_the_padded_secret() {
        let mut rng = rand::thread_rng();
        let oracle = SuffixOracle::new(&mut rng).unwrap();
        // 138 secret bytes, padded up to the next block boundary.
        assert_eq!(144, oracle.encrypt(&[]).unwrap().len());
    }

    #[test]
    fn cookie_oracle_quotes_reserved_characters() {
        let mut rng = rand::thread_rng();
        let oracle = CookieOracle::new(&mut rng).unwrap();
        let honest = oracle.encrypt(b";admin=true").unwrap();
        assert!(!oracle.is_admin(&honest).unwrap());
    }

    #[test]
    fn profile_oracle_strips_reserved_characters() {
        let mut rng = rand::thread_rng();
        let oracle = ProfileOracle::new(&mut rng).unwrap();
        let sneaky = oracle.encrypt(b"a&role=admin").unwrap();
        assert!(!oracle.is_admin(&sneaky).unwrap());
    }
}
