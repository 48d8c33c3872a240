//! Hand-rolled base64 and hex codecs.

#[macro_use]
extern crate failure;

use failure::Error;

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

pub trait Serialize {
    fn to_base64(&self) -> String;
    fn to_hex(&self) -> String;
}

impl Serialize for [u8] {
    fn to_base64(&self) -> String {
        let mut base64 = String::with_capacity((self.len() + 2) / 3 * 4);
        for group in self.chunks(3) {
            let n = (u32::from(group[0]) << 16)
                | (u32::from(*group.get(1).unwrap_or(&0)) << 8)
                | u32::from(*group.get(2).unwrap_or(&0));
            for i in 0..4 {
                if i <= group.len() {
                    base64.push(BASE64_ALPHABET[(n >> (18 - 6 * i)) as usize & 0x3f] as char);
                } else {
                    base64.push('=');
                }
            }
        }
        base64
    }

    fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(2 * self.len());
        for u in self {
            hex.push(std::char::from_digit(u32::from(u >> 4), 16).unwrap());
            hex.push(std::char::from_digit(u32::from(u & 0xf), 16).unwrap());
        }
        hex
    }
}

pub fn from_base64(s: &str) -> Result<Vec<u8>, Error> {
    ensure!(
        s.len() % 4 == 0,
        "base64 input length must be a multiple of 4, got {}",
        s.len()
    );

    let trimmed = s.trim_end_matches('=');
    ensure!(s.len() - trimmed.len() <= 2, "too many base64 padding characters");

    let mut sextets = Vec::with_capacity(trimmed.len());
    for c in trimmed.bytes() {
        match BASE64_ALPHABET.iter().position(|&a| a == c) {
            Some(d) => sextets.push(d as u8),
            None => bail!("invalid base64 character {:?}", c as char),
        }
    }

    let mut decoded = Vec::with_capacity(3 * s.len() / 4);
    for quad in sextets.chunks(4) {
        ensure!(quad.len() != 1, "truncated base64 group");
        let mut n = 0u32;
        for (i, &d) in quad.iter().enumerate() {
            n |= u32::from(d) << (18 - 6 * i);
        }
        let bytes = [(n >> 16) as u8, (n >> 8) as u8, n as u8];
        decoded.extend_from_slice(&bytes[..quad.len() - 1]);
    }
    Ok(decoded)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>, Error> {
    ensure!(
        s.len() % 2 == 0,
        "hex input length must be even, got {}",
        s.len()
    );

    s.as_bytes()
        .chunks(2)
        .map(|pair| Ok(hex_digit(pair[0])? << 4 | hex_digit(pair[1])?))
        .collect()
}

fn hex_digit(c: u8) -> Result<u8, Error> {
    match (c as char).to_digit(16) {
        Some(d) => Ok(d as u8),
        None => bail!("invalid hex character {:?}", c as char),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip_with_padding() {
        assert_eq!("TWFu", b"Man".to_base64());
        assert_eq!("TWE=", b"Ma".to_base64());
        assert_eq!("TQ==", b"M".to_base64());
        assert_eq!(b"Man".to_vec(), from_base64("TWFu").unwrap());
        assert_eq!(b"Ma".to_vec(), from_base64("TWE=").unwrap());
        assert_eq!(b"M".to_vec(), from_base64("TQ==").unwrap());
    }

    #[test]
    fn hex_to_base64() {
        let input = from_hex(
            "49276d206b696c6c696e6720796f757220627261\
             696e206c696b65206120706f69736f6e6f757320\
             6d757368726f6f6d",
        )
        .unwrap();
        assert_eq!(
            "SSdtIGtpbGxpbmcgeW91ciBicmFpbiBsaWtlIGEgcG9pc29ub3VzIG11c2hyb29t",
            input.to_base64()
        );
    }

    #[test]
    fn hex_round_trip() {
        let bytes = from_hex("00ff10a5").unwrap();
        assert_eq!(vec![0x00, 0xff, 0x10, 0xa5], bytes);
        assert_eq!("00ff10a5", bytes.to_hex());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(from_base64("abc").is_err());
        assert!(from_base64("a!cd").is_err());
        assert!(from_hex("abc").is_err());
        assert!(from_hex("zz").is_err());
    }
}
