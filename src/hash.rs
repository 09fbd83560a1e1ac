//! Key hashing for the block tables.
//!
//! Table keys hash by composing a rolling CRC32 over the fields that are
//! present; absent optional fields contribute nothing, so two keys that are
//! structurally equal always hash alike. The hash is only a lookup
//! accelerator and never reaches the wire.

/// Rolling CRC32 over a key's present fields.
pub struct KeyHasher {
    crc: u32,
}

impl KeyHasher {
    pub fn new() -> Self {
        KeyHasher { crc: 0 }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        let mut hasher = crc32fast::Hasher::new_with_initial(self.crc);
        hasher.update(bytes);
        self.crc = hasher.finalize();
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_opt_u8(&mut self, value: Option<u8>) {
        if let Some(value) = value {
            self.write_u8(value);
        }
    }

    pub fn write_opt_u16(&mut self, value: Option<u16>) {
        if let Some(value) = value {
            self.write_u16(value);
        }
    }

    pub fn write_opt_u32(&mut self, value: Option<u32>) {
        if let Some(value) = value {
            self.write_u32(value);
        }
    }

    pub fn write_opt_bytes(&mut self, value: Option<&[u8]>) {
        if let Some(value) = value {
            self.write(value);
        }
    }

    pub fn finish(&self) -> u32 {
        self.crc
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Implemented by anything a [`crate::block_table::BlockTable`] can key on.
pub trait TableKey {
    /// Hash of the present fields; equal values must return equal hashes.
    fn key_hash(&self) -> u32;
}

impl TableKey for Vec<u8> {
    fn key_hash(&self) -> u32 {
        let mut hasher = KeyHasher::new();
        hasher.write(self);
        hasher.finish()
    }
}

impl TableKey for Vec<u32> {
    fn key_hash(&self) -> u32 {
        let mut hasher = KeyHasher::new();
        for index in self {
            hasher.write_u32(*index);
        }
        hasher.finish()
    }
}
