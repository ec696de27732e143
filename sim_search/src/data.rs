use std::fmt;

use ascii::AsciiString;
use byteorder::{BigEndian, ByteOrder};
use rand::Rng;

use crate::error::Error;

pub type ItemIndex = usize;

pub const IDENTIFIER_SIZE: usize = 16;

/// Bit fingerprint packed into 64 bit words, most significant word first.
///
/// The cardinality (total number of set bits) is computed once at
/// construction since every similarity evaluation needs it.
#[derive(Debug, PartialEq, Clone)]
pub struct Fingerprint {
    pub words: Vec<u64>,
    pub cardinality: u32,
}

impl Fingerprint {
    pub fn from_words(words: Vec<u64>) -> Self {
        let cardinality = words.iter().map(|w| w.count_ones()).sum();
        return Self { words, cardinality };
    }

    /// Parses a hex string into words of 16 hex digits each. A short
    /// trailing group is left aligned, so "f" and "f000000000000000" denote
    /// the same single word.
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        let bytes = hex.as_bytes();
        let mut words: Vec<u64> = Vec::with_capacity((bytes.len() + 15) / 16);

        for chunk in bytes.chunks(16) {
            let s = std::str::from_utf8(chunk)
                .map_err(|_| Error::BadFingerprint(format!("non-ascii hex: {}", hex)))?;
            let word = u64::from_str_radix(s, 16)
                .map_err(|_| Error::BadFingerprint(format!("invalid hex group: {}", s)))?;
            words.push(word << ((16 - chunk.len()) * 4));
        }

        return Ok(Self::from_words(words));
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(self.words.len() * 16);
        for word in self.words.iter() {
            s += &format!("{:016x}", word);
        }
        return s;
    }

    pub fn bin_string(&self) -> String {
        let mut s = String::with_capacity(self.words.len() * 64);
        for word in self.words.iter() {
            s += &format!("{:064b}", word);
        }
        return s;
    }

    /// Parses the big-endian binary form written by `to_vec`.
    pub fn from_slice(record_slice: &[u8]) -> Result<Self, Error> {
        if record_slice.len() % 8 != 0 {
            return Err(Error::BadFingerprint(format!(
                "binary fingerprint length {} is not a multiple of 8",
                record_slice.len()
            )));
        }

        let mut words: Vec<u64> = Vec::with_capacity(record_slice.len() / 8);
        for chunk in record_slice.chunks(8) {
            words.push(BigEndian::read_u64(chunk));
        }

        return Ok(Self::from_words(words));
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut vec: Vec<u8> = Vec::with_capacity(self.words.len() * 8);
        for word in self.words.iter() {
            let mut slice = [0u8; 8];
            BigEndian::write_u64(&mut slice, *word);
            vec.extend_from_slice(&slice);
        }
        return vec;
    }

    pub fn random(n_words: usize) -> Self {
        let words: Vec<u64> = (0..n_words).map(|_| rand::random::<u64>()).collect();
        return Self::from_words(words);
    }

    fn common_bits(&self, other: &Fingerprint) -> u32 {
        let len = self.words.len().min(other.words.len());
        let mut common: u32 = 0;
        for i in 0..len {
            common += (self.words[i] & other.words[i]).count_ones();
        }
        return common;
    }

    /// Tanimoto similarity: common / (a + b - common).
    ///
    /// Two empty fingerprints are considered identical.
    pub fn tanimoto(&self, other: &Fingerprint) -> f64 {
        if self.cardinality == 0 && other.cardinality == 0 {
            return 1.0;
        }

        let common = self.common_bits(other);
        return common as f64 / (self.cardinality + other.cardinality - common) as f64;
    }

    /// Size-corrected variant: common / (2 * max(a, b) - common), less
    /// sensitive to a large difference in bit counts.
    pub fn max_tanimoto(&self, other: &Fingerprint) -> f64 {
        if self.cardinality == 0 && other.cardinality == 0 {
            return 1.0;
        }

        let common = self.common_bits(other);
        let max = self.cardinality.max(other.cardinality);
        return common as f64 / (2 * max - common) as f64;
    }

    /// Tanimoto with an early out: min(a, b) / max(a, b) bounds the
    /// similarity from above, so when that bound is already below `min_sim`
    /// the exact value is never computed and 0 is returned.
    pub fn tanimoto_with_min(&self, other: &Fingerprint, min_sim: f64) -> f64 {
        if self.cardinality == 0 && other.cardinality == 0 {
            return 1.0;
        }

        let lo = self.cardinality.min(other.cardinality);
        let hi = self.cardinality.max(other.cardinality);
        let bound = lo as f64 / hi as f64;
        if bound < min_sim {
            return 0.0;
        }

        return self.tanimoto(other);
    }

    pub fn n_bits(&self) -> u32 {
        return self.cardinality;
    }
}

/// Fixed width ascii identifier carried along with an input record.
#[derive(PartialEq, Eq, Clone)]
pub struct ItemIdentifier(pub [u8; IDENTIFIER_SIZE]);

impl ItemIdentifier {
    pub fn from_string(s: String) -> Self {
        assert!(s.len() <= IDENTIFIER_SIZE);

        return Self::from_str(&s);
    }

    pub fn from_str(data: &str) -> Self {
        let mut fill_arr = [0u8; IDENTIFIER_SIZE];

        let bytes = data.as_bytes();
        fill_arr[..bytes.len()].copy_from_slice(bytes);

        return Self(fill_arr);
    }

    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; IDENTIFIER_SIZE];

        for x in &mut bytes {
            *x = rng.gen_range(65..91);
        }

        return Self(bytes);
    }

    pub fn to_string(&self) -> String {
        let trimmed: Vec<u8> = self.0.iter().take_while(|b| **b != 0).cloned().collect();
        let identifier_str: AsciiString = AsciiString::from_ascii(trimmed).unwrap();

        return String::from(identifier_str);
    }
}

impl fmt::Debug for ItemIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_string())
    }
}

/// One raw input record: the fingerprint payload as hex plus an optional
/// identifier. Parsing the payload into a comparable is the factory's job.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub fp_hex: String,
    pub identifier: Option<ItemIdentifier>,
}

impl ItemRecord {
    pub fn new(fp_hex: String, identifier: Option<ItemIdentifier>) -> Self {
        return Self { fp_hex, identifier };
    }

    pub fn random(n_words: usize) -> Self {
        return Self {
            fp_hex: Fingerprint::random(n_words).to_hex(),
            identifier: Some(ItemIdentifier::random()),
        };
    }
}
