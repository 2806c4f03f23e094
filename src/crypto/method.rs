//! Supported cipher methods
//!
//! Only stream-shaped modes are offered: the tunnel encrypts arbitrary
//! byte chunks without padding or framing, so block modes (`*-cbc`) and
//! AEAD modes (`*-gcm`, `*-ocb`) are rejected, as is `seed-cfb`.

use std::fmt;
use std::str::FromStr;

use crate::error::SocksError;

/// Stream cipher algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherMethod {
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Aes128Ofb,
    Aes192Ofb,
    Aes256Ofb,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    Aes128Cfb8,
    Aes192Cfb8,
    Aes256Cfb8,
    Aes128Cfb1,
    Aes192Cfb1,
    Aes256Cfb1,
    BfCfb,
    Camellia128Cfb,
    Camellia192Cfb,
    Camellia256Cfb,
    Cast5Cfb,
    DesCfb,
    IdeaCfb,
    Rc2Cfb,
    Rc4,
}

/// `(method, name, key_len, iv_len)`
const TABLE: [(CipherMethod, &str, usize, usize); 24] = [
    (CipherMethod::Aes128Cfb, "aes-128-cfb", 16, 16),
    (CipherMethod::Aes192Cfb, "aes-192-cfb", 24, 16),
    (CipherMethod::Aes256Cfb, "aes-256-cfb", 32, 16),
    (CipherMethod::Aes128Ofb, "aes-128-ofb", 16, 16),
    (CipherMethod::Aes192Ofb, "aes-192-ofb", 24, 16),
    (CipherMethod::Aes256Ofb, "aes-256-ofb", 32, 16),
    (CipherMethod::Aes128Ctr, "aes-128-ctr", 16, 16),
    (CipherMethod::Aes192Ctr, "aes-192-ctr", 24, 16),
    (CipherMethod::Aes256Ctr, "aes-256-ctr", 32, 16),
    (CipherMethod::Aes128Cfb8, "aes-128-cfb8", 16, 16),
    (CipherMethod::Aes192Cfb8, "aes-192-cfb8", 24, 16),
    (CipherMethod::Aes256Cfb8, "aes-256-cfb8", 32, 16),
    (CipherMethod::Aes128Cfb1, "aes-128-cfb1", 16, 16),
    (CipherMethod::Aes192Cfb1, "aes-192-cfb1", 24, 16),
    (CipherMethod::Aes256Cfb1, "aes-256-cfb1", 32, 16),
    (CipherMethod::BfCfb, "bf-cfb", 16, 8),
    (CipherMethod::Camellia128Cfb, "camellia-128-cfb", 16, 16),
    (CipherMethod::Camellia192Cfb, "camellia-192-cfb", 24, 16),
    (CipherMethod::Camellia256Cfb, "camellia-256-cfb", 32, 16),
    (CipherMethod::Cast5Cfb, "cast5-cfb", 16, 8),
    (CipherMethod::DesCfb, "des-cfb", 8, 8),
    (CipherMethod::IdeaCfb, "idea-cfb", 16, 8),
    (CipherMethod::Rc2Cfb, "rc2-cfb", 16, 8),
    (CipherMethod::Rc4, "rc4", 16, 0),
];

impl CipherMethod {
    pub const ALL: [CipherMethod; 24] = {
        let mut all = [CipherMethod::Aes128Cfb; 24];
        let mut i = 0;
        while i < TABLE.len() {
            all[i] = TABLE[i].0;
            i += 1;
        }
        all
    };

    fn entry(self) -> (&'static str, usize, usize) {
        // Variants are declared in table order
        let (_, name, key_len, iv_len) = TABLE[self as usize];
        (name, key_len, iv_len)
    }

    pub fn name(self) -> &'static str {
        self.entry().0
    }

    pub fn key_len(self) -> usize {
        self.entry().1
    }

    /// Zero for `rc4`, which sends no IV
    pub fn iv_len(self) -> usize {
        self.entry().2
    }
}

impl fmt::Display for CipherMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherMethod {
    type Err = SocksError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_ascii_lowercase();
        CipherMethod::ALL
            .into_iter()
            .find(|method| method.name() == wanted)
            .ok_or_else(|| SocksError::UnknownMethod(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method() {
        assert_eq!("AES-256-CFB".parse::<CipherMethod>().unwrap(), CipherMethod::Aes256Cfb);
        assert_eq!("camellia-192-cfb".parse::<CipherMethod>().unwrap(), CipherMethod::Camellia192Cfb);
        assert_eq!(CipherMethod::Aes192Ctr.key_len(), 24);
        assert!("rc4-md5".parse::<CipherMethod>().is_err());
    }

    #[test]
    fn test_table_order_matches_variants() {
        for (i, method) in CipherMethod::ALL.into_iter().enumerate() {
            assert_eq!(method as usize, i);
            assert_eq!(method.name().parse::<CipherMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_lengths() {
        assert_eq!((CipherMethod::DesCfb.key_len(), CipherMethod::DesCfb.iv_len()), (8, 8));
        assert_eq!((CipherMethod::BfCfb.key_len(), CipherMethod::BfCfb.iv_len()), (16, 8));
        assert_eq!((CipherMethod::Rc4.key_len(), CipherMethod::Rc4.iv_len()), (16, 0));
        assert_eq!(CipherMethod::Aes256Cfb1.key_len(), 32);
    }

    #[test]
    fn test_non_stream_modes_rejected() {
        for name in ["aes-128-cbc", "aes-256-gcm", "aes-192-ocb", "seed-cfb"] {
            assert!(name.parse::<CipherMethod>().is_err(), "{name}");
        }
    }
}
