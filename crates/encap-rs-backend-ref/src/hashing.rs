const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

/// Incremental FNV-1a over length-prefixed fields.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint {
    hash: u64,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self { hash: FNV1A_OFFSET }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.hash ^= u64::from(*byte);
            self.hash = self.hash.wrapping_mul(FNV1A_PRIME);
        }
    }

    pub fn write_usize(&mut self, value: usize) {
        self.write_bytes(&(value as u64).to_le_bytes());
    }

    /// Length prefix keeps `("ab", "c")` and `("a", "bc")` apart.
    pub fn write_str(&mut self, value: &str) {
        self.write_usize(value.len());
        self.write_bytes(value.as_bytes());
    }

    pub fn finish(self) -> u64 {
        self.hash
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}
