//! In-flight byte transforms for obfuscated containers.
//!
//! A [`Cipher`] is keyed by the *absolute* position of each byte, so a
//! reader may seek freely and the keystream stays aligned.

/// Transparent byte transform applied by [`ArchiveReader`](super::ArchiveReader)
/// and by the XOR exporter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Cipher {
    #[default]
    None,
    /// Every byte XORed with one constant.
    Xor(u8),
    /// Byte at position `p >= origin` XORed with `key[(p - origin) % key.len()]`.
    /// Bytes before `origin` pass through unchanged.
    RepeatingXor { key: Vec<u8>, origin: u64 },
}

impl Cipher {
    pub fn repeating(key: impl Into<Vec<u8>>) -> Self {
        Cipher::RepeatingXor { key: key.into(), origin: 0 }
    }

    pub fn is_identity(&self) -> bool {
        match self {
            Cipher::None                      => true,
            Cipher::Xor(k)                    => *k == 0,
            Cipher::RepeatingXor { key, .. }  => key.iter().all(|&b| b == 0),
        }
    }

    /// Transform `data`, whose first byte sits at absolute `position`.
    /// XOR is an involution, so the same call encrypts and decrypts.
    pub fn apply(&self, position: u64, data: &mut [u8]) {
        match self {
            Cipher::None => {}
            Cipher::Xor(k) => {
                for b in data.iter_mut() {
                    *b ^= *k;
                }
            }
            Cipher::RepeatingXor { key, origin } => {
                if key.is_empty() {
                    return;
                }
                let n = key.len() as u64;
                for (i, b) in data.iter_mut().enumerate() {
                    let p = position + i as u64;
                    if p < *origin {
                        continue;
                    }
                    *b ^= key[((p - origin) % n) as usize];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_xor_is_involution() {
        let c = Cipher::Xor(0x5A);
        let mut data = b"plain".to_vec();
        c.apply(0, &mut data);
        assert_ne!(data, b"plain");
        c.apply(0, &mut data);
        assert_eq!(data, b"plain");
    }

    #[test]
    fn repeating_key_is_position_aligned() {
        let c = Cipher::repeating(vec![1, 2, 3]);
        let mut whole = vec![0u8; 7];
        c.apply(0, &mut whole);
        assert_eq!(whole, [1, 2, 3, 1, 2, 3, 1]);

        // Same bytes transformed piecewise from an arbitrary position.
        let mut tail = vec![0u8; 3];
        c.apply(4, &mut tail);
        assert_eq!(tail, [2, 3, 1]);
    }

    #[test]
    fn origin_leaves_header_plain() {
        let c = Cipher::RepeatingXor { key: vec![0xFF], origin: 2 };
        let mut data = vec![0u8; 4];
        c.apply(0, &mut data);
        assert_eq!(data, [0, 0, 0xFF, 0xFF]);
        assert!(Cipher::Xor(0).is_identity());
        assert!(!c.is_identity());
    }
}
