//! Minimal `key=value` codec for the cookie and profile oracles, plus the
//! two input sanitizers those oracles apply before encrypting.

/// Decodes `key=value` pairs separated by `sep`. Segments without a `=`
/// (for example a block shredded by a bit-flip) are skipped rather than
/// rejected; a second `=` inside a segment belongs to the value.
pub fn decode(data: &[u8], sep: u8) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut pairs = Vec::new();
    for part in data.split(|&c| c == sep) {
        let mut kv = part.splitn(2, |&c| c == b'=');
        if let (Some(key), Some(value)) = (kv.next(), kv.next()) {
            pairs.push((key.to_vec(), value.to_vec()));
        }
    }
    pairs
}

/// First value stored under `key`.
pub fn field<'a>(pairs: &'a [(Vec<u8>, Vec<u8>)], key: &[u8]) -> Option<&'a [u8]> {
    pairs
        .iter()
        .find(|&&(ref k, _)| k[..] == key[..])
        .map(|&(_, ref v)| &v[..])
}

/// Drops reserved metacharacters from the input entirely (the profile
/// server's sanitizer).
pub fn strip_metachars(input: &[u8], reserved: &[u8]) -> Vec<u8> {
    input
        .iter()
        .cloned()
        .filter(|c| !reserved.contains(c))
        .collect()
}

/// Wraps reserved metacharacters in quotes, `a;b` becoming `a';'b` (the
/// cookie server's sanitizer).
pub fn quote_metachars(input: &[u8], reserved: &[u8]) -> Vec<u8> {
    let mut quoted = Vec::with_capacity(input.len());
    for &c in input {
        if reserved.contains(&c) {
            quoted.push(b'\'');
            quoted.push(c);
            quoted.push(b'\'');
        } else {
            quoted.push(c);
        }
    }
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pairs_and_skips_garbage() {
        let pairs = decode(b"a=1;noise;b=2=3", b';');
        assert_eq!(Some(&b"1"[..]), field(&pairs, b"a"));
        assert_eq!(Some(&b"2=3"[..]), field(&pairs, b"b"));
        assert_eq!(None, field(&pairs, b"noise"));
        assert_eq!(None, field(&pairs, b"missing"));
    }

    #[test]
    fn sanitizers_disagree_on_purpose() {
        assert_eq!(b"ab".to_vec(), strip_metachars(b"a&=b", b"&="));
        assert_eq!(b"a';'b'='c".to_vec(), quote_metachars(b"a;b=c", b";="));
    }
}
