//! Attacks on counter mode: plaintext recovery through an edit oracle,
//! keystream-reuse bit-flipping, and nonce-reuse keystream recovery.

use rand::Rng;

use blockmodes::{ctr_edit, random_block, Aes128Mode, Mode, NONCE_SIZE};
use serialize::Serialize;
use xor::Xor;

use crate::ecb;
use crate::errors::*;
use crate::oracles::{CtrCookieOracle, Oracle};
use crate::score;

/// Counter-mode "rewrite at offset" surface: the attacker sees one
/// ciphertext and may splice new plaintext anywhere into it, but never
/// holds the key.
pub trait EditOracle {
    fn ciphertext(&self) -> &[u8];
    fn edit(&self, offset: usize, newtext: &[u8]) -> Result<Vec<u8>>;
}

pub struct EditServer {
    cleartext: Vec<u8>,
    key: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl EditServer {
    pub fn new<R: Rng>(rng: &mut R, cleartext: Vec<u8>) -> Result<Self> {
        let key = random_block(rng);
        let nonce: Vec<u8> = rng.gen_iter::<u8>().take(NONCE_SIZE).collect();
        let ciphertext = cleartext.encrypt(&key, Some(&nonce), Mode::Ctr)?;
        Ok(EditServer {
            cleartext,
            key,
            nonce,
            ciphertext,
        })
    }

    pub fn verify_cleartext(&self, candidate: &[u8]) -> Result<()> {
        compare_eq(&self.cleartext[..], candidate)
    }
}

impl EditOracle for EditServer {
    fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    fn edit(&self, offset: usize, newtext: &[u8]) -> Result<Vec<u8>> {
        ctr_edit(&self.ciphertext, &self.key, &self.nonce, offset, newtext)
    }
}

/// Recovers the plaintext one byte at a time: splicing the right candidate
/// reproduces the original ciphertext byte, because both XOR the same
/// keystream byte. No key and no decryption call anywhere.
pub fn recover_plaintext_via_edit<T: EditOracle>(oracle: &T) -> Result<Vec<u8>> {
    let original = oracle.ciphertext().to_vec();
    let mut cleartext = Vec::with_capacity(original.len());
    for i in 0..original.len() {
        let mut found = None;
        for candidate in 0u8..=255 {
            if oracle.edit(i, &[candidate])?[i] == original[i] {
                found = Some(candidate);
                break;
            }
        }
        match found {
            Some(u) => cleartext.push(u),
            None => return Err(AttackError::OracleExhausted { position: i }.into()),
        }
    }
    Ok(cleartext)
}

/// Injects `;admin=true` by xor'ing it over a known-zero slot. In counter
/// mode a ciphertext flip lands on the very same plaintext byte, so there
/// is no collateral damage to hide.
pub fn forge_admin_cookie(oracle: &CtrCookieOracle) -> Result<Vec<u8>> {
    let prefix_len = ecb::prefix_length(oracle)?;
    let target = b";admin=true";
    let mut ciphertext = oracle.encrypt(&vec![0; target.len()])?;
    ciphertext[prefix_len..prefix_len + target.len()].xor_inplace(target);
    Ok(ciphertext)
}

pub struct SharedNonceEncrypter {
    key: Vec<u8>,
    nonce: Vec<u8>,
}

impl SharedNonceEncrypter {
    pub fn new<R: Rng>(rng: &mut R) -> Self {
        SharedNonceEncrypter {
            key: random_block(rng),
            nonce: rng.gen_iter::<u8>().take(NONCE_SIZE).collect(),
        }
    }

    /// Encrypts every message under the same key and nonce, which is the
    /// mistake the recovery feeds on.
    pub fn encrypt_all(&self, cleartexts: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        cleartexts
            .iter()
            .map(|c| c.encrypt(&self.key, Some(&self.nonce), Mode::Ctr))
            .collect()
    }

    /// Number of positions where `candidate` disagrees with the true
    /// keystream. Statistical recovery is allowed a small residue.
    pub fn keystream_errors(&self, candidate: &[u8]) -> Result<usize> {
        let truth = vec![0; candidate.len()].encrypt(&self.key, Some(&self.nonce), Mode::Ctr)?;
        Ok(candidate
            .iter()
            .zip(truth.iter())
            .filter(|&(a, b)| a != b)
            .count())
    }
}

/// Treats each ciphertext column over the common prefix as an independent
/// single-byte XOR cipher and breaks it with the English scorer. Column
/// zero is the least reliable: first letters of lines are distributed
/// differently from running text.
pub fn recover_shared_keystream(ciphertexts: &[Vec<u8>]) -> Vec<u8> {
    let size = ciphertexts.iter().map(|c| c.len()).min().unwrap_or(0);
    let mut columns: Vec<Vec<u8>> = vec![Vec::with_capacity(ciphertexts.len()); size];
    for ciphertext in ciphertexts {
        for (&u, column) in ciphertext[..size].iter().zip(columns.iter_mut()) {
            column.push(u);
        }
    }
    columns
        .iter()
        .map(|column| score::break_single_byte_xor(column))
        .collect()
}

// Intercepted traffic for the nonce-reuse scenario.
const STANZAS: [&str; 39] = [
    "I'm back and I'm ringin' the bell",
    "A rockin' on the mike while the fly girls yell",
    "In ecstasy in the back of me",
    "Well that's my DJ Deshay cuttin' all them Z's",
    "Hittin' hard and the girlies goin' crazy",
    "Vanilla's on the mike, man I'm not lazy",
    "I'm lettin' my drug kick in",
    "It controls my mouth and I begin",
    "To just let it flow, let my concepts go",
    "My posse's to the side yellin', Go Vanilla Go!",
    "Smooth 'cause that's the way I will be",
    "And if you don't give a damn, then",
    "Why you starin' at me",
    "So get off 'cause I control the stage",
    "There's no dissin' allowed",
    "I'm in my own phase",
    "The girlies sa y they love me and that is ok",
    "And I can dance better than any kid n' play",
    "Stage 2 -- Yea the one ya' wanna listen to",
    "It's off my head so let the beat play through",
    "So I can funk it up and make it sound good",
    "1-2-3 Yo -- Knock on some wood",
    "For good luck, I like my rhymes atrocious",
    "Supercalafragilisticexpialidocious",
    "I'm an effect and that you can bet",
    "I can take a fly girl and make her wet.",
    "VIP. Vanilla Ice yep, yep, I'm comin' hard like a rhino",
    "Intoxicating so you stagger like a wino",
    "So punks stop trying and girl stop cryin'",
    "Vanilla Ice is sellin' and you people are buyin'",
    "'Cause why the freaks are jockin' like Crazy Glue",
    "Movin' and groovin' trying to sing along",
    "All through the ghetto groovin' this here song",
    "Now you're amazed by the VIP posse.",
    "Startled by the bases hittin' ground",
    "There's no trippin' on mine, I'm just gettin' down",
    "Sparkamatic, I'm hangin' tight like a fanatic",
    "You trapped me once and I thought that",
    "So step down and lend me your ear",
];

// Frequency analysis over a couple dozen samples per column leaves a few
// wrong bytes now and then; that residue is part of the attack's contract.
const TOLERATED_KEYSTREAM_ERRORS: usize = 4;

pub fn run_edit_recovery() -> Result<()> {
    let mut rng = rand::thread_rng();
    let server = EditServer::new(
        &mut rng,
        b"Burning 'em, if you ain't quick and nimble I go crazy when I hear a cymbal".to_vec(),
    )?;
    let recovered = recover_plaintext_via_edit(&server)?;
    server.verify_cleartext(&recovered)
}

pub fn run_cookie_forgery() -> Result<()> {
    let mut rng = rand::thread_rng();
    let oracle = CtrCookieOracle::new(&mut rng)?;
    compare_eq(false, oracle.is_admin(&oracle.encrypt(b";admin=true")?)?)?;
    compare_eq(true, oracle.is_admin(&forge_admin_cookie(&oracle)?)?)
}

pub fn run_nonce_reuse() -> Result<()> {
    let mut rng = rand::thread_rng();
    let encrypter = SharedNonceEncrypter::new(&mut rng);
    let cleartexts: Vec<&[u8]> = STANZAS.iter().map(|s| s.as_bytes()).collect();
    let ciphertexts = encrypter.encrypt_all(&cleartexts)?;

    let keystream = recover_shared_keystream(&ciphertexts);
    let errors = encrypter.keystream_errors(&keystream)?;
    ensure!(
        errors <= TOLERATED_KEYSTREAM_ERRORS,
        "recovered keystream {} has {} wrong bytes, tolerated at most {}",
        keystream.to_hex(),
        errors,
        TOLERATED_KEYSTREAM_ERRORS
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_plaintext_through_edits() {
        run_edit_recovery().unwrap();
    }

    #[test]
    fn forges_admin_cookie_in_counter_mode() {
        run_cookie_forgery().unwrap();
    }

    #[test]
    fn recovers_keystream_from_nonce_reuse() {
        run_nonce_reuse().unwrap();
    }

    #[test]
    fn shared_keystream_decrypts_the_shortest_ciphertext() {
        let mut rng = rand::thread_rng();
        let encrypter = SharedNonceEncrypter::new(&mut rng);
        let cleartexts: Vec<&[u8]> = STANZAS.iter().map(|s| s.as_bytes()).collect();
        let ciphertexts = encrypter.encrypt_all(&cleartexts).unwrap();

        let keystream = recover_shared_keystream(&ciphertexts);
        let shortest = ciphertexts.iter().min_by_key(|c| c.len()).unwrap();
        let decrypted = shortest.xor(&keystream[..shortest.len()]);
        let truth = cleartexts.iter().min_by_key(|c| c.len()).unwrap();
        let wrong = decrypted
            .iter()
            .zip(truth.iter())
            .filter(|&(a, b)| a != b)
            .count();
        assert!(
            wrong <= TOLERATED_KEYSTREAM_ERRORS,
            "{} wrong bytes in {:?}",
            wrong,
            String::from_utf8_lossy(&decrypted)
        );
    }
}
