use std::fmt;

/// Size of the addressable region when a machine starts or restarts.
pub const DEFAULT_MEMORY_SIZE: u16 = 1024;
/// Addresses are 16 bits wide, so the region can never outgrow this.
pub const MEMORY_MAX: usize = 0xFFFF;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemoryError {
    /// Access touching `addr` (first byte) with `len` bytes lies outside `[0, size)`.
    OutOfBounds { addr: u32, len: u8, size: u16 },
    /// Growing by `delta` would exceed [`MEMORY_MAX`].
    GrowTooLarge { delta: u16, size: u16 },
    /// Shrinking by `delta` would free the whole region or more.
    ShrinkTooLarge { delta: u16, size: u16 },
    /// Host allocation failed while resizing.
    Alloc { requested: usize },
    /// Program image does not fit into the region.
    ImageTooLarge { len: usize, size: u16 },
}

impl std::error::Error for MemoryError {}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { addr, len, size } => write!(
                f,
                "access of {len} byte(s) at 0x{addr:04x} outside valid range 0x0000 - 0x{:04x}",
                size.saturating_sub(1)
            ),
            Self::GrowTooLarge { delta, size } => write!(
                f,
                "growing 0x{size:04x} bytes by 0x{delta:04x} exceeds maximum size 0x{MEMORY_MAX:04x}"
            ),
            Self::ShrinkTooLarge { delta, size } => write!(
                f,
                "cannot free 0x{delta:04x} bytes from a region of 0x{size:04x} bytes"
            ),
            Self::Alloc { requested } => {
                write!(f, "failed to allocate {requested} bytes")
            }
            Self::ImageTooLarge { len, size } => write!(
                f,
                "program of {len} bytes does not fit in 0x{size:04x} bytes of memory"
            ),
        }
    }
}

/// The single byte-addressable region holding code, data and stack.
///
/// Every access is bounds checked against the current size, which changes at runtime
/// through [`Memory::grow`] and [`Memory::shrink`].
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new(size: u16) -> Self {
        Memory {
            bytes: vec![0; size as usize],
        }
    }

    pub fn size(&self) -> u16 {
        // Never exceeds MEMORY_MAX
        self.bytes.len() as u16
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn check(&self, addr: u32, len: u8) -> Result<usize, MemoryError> {
        if addr + len as u32 > self.bytes.len() as u32 {
            return Err(MemoryError::OutOfBounds {
                addr,
                len,
                size: self.size(),
            });
        }
        Ok(addr as usize)
    }

    pub fn read_byte(&self, addr: u16) -> Result<u8, MemoryError> {
        let idx = self.check(addr as u32, 1)?;
        Ok(self.bytes[idx])
    }

    pub fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), MemoryError> {
        let idx = self.check(addr as u32, 1)?;
        self.bytes[idx] = value;
        Ok(())
    }

    /// Little-endian word at `addr, addr + 1`.
    pub fn read_word(&self, addr: u16) -> Result<u16, MemoryError> {
        let idx = self.check(addr as u32, 2)?;
        Ok(u16::from_le_bytes([self.bytes[idx], self.bytes[idx + 1]]))
    }

    pub fn write_word(&mut self, addr: u16, value: u16) -> Result<(), MemoryError> {
        let idx = self.check(addr as u32, 2)?;
        self.bytes[idx..idx + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Grow by `delta` zeroed bytes. Nothing changes on failure.
    pub fn grow(&mut self, delta: u16) -> Result<(), MemoryError> {
        let size = self.size();
        let new_size = size as usize + delta as usize;
        if new_size > MEMORY_MAX {
            return Err(MemoryError::GrowTooLarge { delta, size });
        }
        self.bytes
            .try_reserve_exact(delta as usize)
            .map_err(|_| MemoryError::Alloc {
                requested: new_size,
            })?;
        self.bytes.resize(new_size, 0);
        Ok(())
    }

    /// Release the top `delta` bytes. At least one byte always remains.
    pub fn shrink(&mut self, delta: u16) -> Result<(), MemoryError> {
        let size = self.size();
        if delta >= size {
            return Err(MemoryError::ShrinkTooLarge { delta, size });
        }
        self.bytes.truncate((size - delta) as usize);
        self.bytes.shrink_to_fit();
        Ok(())
    }

    /// Zero the region and restore it to `size` bytes.
    pub fn reset(&mut self, size: u16) {
        self.bytes.clear();
        self.bytes.resize(size as usize, 0);
    }

    /// Copy a program image to address 0.
    pub fn load(&mut self, image: &[u8]) -> Result<(), MemoryError> {
        if image.len() > self.bytes.len() {
            return Err(MemoryError::ImageTooLarge {
                len: image.len(),
                size: self.size(),
            });
        }
        self.bytes[..image.len()].copy_from_slice(image);
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new(DEFAULT_MEMORY_SIZE)
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory").field("size", &self.size()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian() {
        let mut mem = Memory::new(16);
        mem.write_word(4, 0xbeef).unwrap();
        assert_eq!(mem.read_byte(4), Ok(0xef));
        assert_eq!(mem.read_byte(5), Ok(0xbe));
        assert_eq!(mem.read_word(4), Ok(0xbeef));
    }

    #[test]
    fn bounds_are_checked_per_byte() {
        let mut mem = Memory::new(16);
        assert!(mem.read_byte(15).is_ok());
        assert!(mem.read_byte(16).is_err());
        // Second byte of the word would be out of range
        assert_eq!(
            mem.write_word(15, 1),
            Err(MemoryError::OutOfBounds {
                addr: 15,
                len: 2,
                size: 16
            })
        );
        assert!(mem.read_word(0xffff).is_err());
    }

    #[test]
    fn grow_then_shrink_restores_size_and_contents() {
        let mut mem = Memory::new(DEFAULT_MEMORY_SIZE);
        for addr in 0..DEFAULT_MEMORY_SIZE {
            mem.write_byte(addr, (addr % 251) as u8).unwrap();
        }
        mem.grow(512).unwrap();
        assert_eq!(mem.size(), DEFAULT_MEMORY_SIZE + 512);
        assert_eq!(mem.read_byte(DEFAULT_MEMORY_SIZE + 100), Ok(0));
        mem.shrink(512).unwrap();
        assert_eq!(mem.size(), DEFAULT_MEMORY_SIZE);
        for addr in 0..DEFAULT_MEMORY_SIZE {
            assert_eq!(mem.read_byte(addr), Ok((addr % 251) as u8));
        }
    }

    #[test]
    fn grow_past_ceiling_is_rejected() {
        let mut mem = Memory::new(DEFAULT_MEMORY_SIZE);
        let delta = (MEMORY_MAX - DEFAULT_MEMORY_SIZE as usize + 1) as u16;
        assert!(matches!(
            mem.grow(delta),
            Err(MemoryError::GrowTooLarge { .. })
        ));
        assert_eq!(mem.size(), DEFAULT_MEMORY_SIZE);
        mem.grow(delta - 1).unwrap();
        assert_eq!(mem.size() as usize, MEMORY_MAX);
    }

    #[test]
    fn shrink_cannot_free_everything() {
        let mut mem = Memory::new(8);
        assert!(mem.shrink(8).is_err());
        assert!(mem.shrink(9).is_err());
        mem.shrink(7).unwrap();
        assert_eq!(mem.size(), 1);
    }

    #[test]
    fn load_copies_image_to_start() {
        let mut mem = Memory::new(4);
        mem.load(&[1, 2, 3]).unwrap();
        assert_eq!(mem.as_slice(), &[1, 2, 3, 0]);
        assert!(mem.load(&[0; 5]).is_err());
    }
}
