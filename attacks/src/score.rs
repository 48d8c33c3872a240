//! English-likelihood scoring used to rank candidate decryptions. A crude
//! heuristic by design: the cryptographic attacks only need "more English
//! than the other 255 candidates".

use xor::Xor;

// Relative letter frequencies in percent, see http://norvig.com/mayzner.html.
// The space weight dominates deliberately: real sentences contain spaces,
// XOR garbage rarely does.
static LETTER_FREQUENCIES: [(u8, f32); 27] = [
    (b' ', 25.0),
    (b'a', 8.04),
    (b'b', 1.48),
    (b'c', 3.34),
    (b'd', 3.82),
    (b'e', 12.49),
    (b'f', 2.40),
    (b'g', 1.87),
    (b'h', 5.05),
    (b'i', 7.57),
    (b'j', 0.16),
    (b'k', 0.54),
    (b'l', 4.07),
    (b'm', 2.51),
    (b'n', 7.23),
    (b'o', 7.64),
    (b'p', 2.14),
    (b'q', 0.12),
    (b'r', 6.28),
    (b's', 6.51),
    (b't', 9.28),
    (b'u', 2.73),
    (b'v', 1.05),
    (b'w', 1.68),
    (b'x', 0.23),
    (b'y', 1.66),
    (b'z', 0.09),
];

fn frequency(u: u8) -> f32 {
    let c = u.to_ascii_lowercase();
    LETTER_FREQUENCIES
        .iter()
        .find(|&&(l, _)| l == c)
        .map_or(0.0, |&(_, f)| f)
}

/// Additive frequency score; higher is more English. Control characters
/// other than newline disqualify the candidate outright.
pub fn english_score(v: &[u8]) -> f32 {
    let mut total = 0.0;
    for &u in v {
        if (u < 0x20 && u != b'\n') || u >= 0x7f {
            return 0.0;
        }
        total += frequency(u);
    }
    total
}

/// The single-byte key under which `input` decrypts to the most plausible
/// English.
pub fn break_single_byte_xor(input: &[u8]) -> u8 {
    let mut best_key = 0u8;
    let mut best_score = -1.0f32;
    for key in 0u8..=255 {
        let score = english_score(&input.xor(&[key]));
        if score > best_score {
            best_key = key;
            best_score = score;
        }
    }
    best_key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_beats_garbage() {
        assert!(english_score(b"the quick brown fox") > english_score(b"q#r!zz^p@@kk{{.."));
        assert_eq!(0.0, english_score(b"binary\x00junk"));
    }

    #[test]
    fn recovers_a_single_byte_key() {
        let ciphertext = b"Cooking MC's like a pound of bacon".xor(&[b'X']);
        assert_eq!(b'X', break_single_byte_xor(&ciphertext));
    }
}
