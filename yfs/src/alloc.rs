#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// One bit per inode or block number, set while the number is in use.
#[derive(Debug, Clone)]
pub struct Bitmap {
    bitmap: Vec<u64>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            bitmap: vec![0; (len + 63) / 64],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, nr: usize) -> State {
        assert!(nr < self.len, "bit {} out of range", nr);
        // Grab the u64 containing the significant bit.
        let outer_offset = self.bitmap[nr / 64];

        let inner_offset = nr % 64;
        let mask = 0b01_u64 << inner_offset;
        match (outer_offset & mask) >> inner_offset {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn set_reserved(&mut self, nr: usize) {
        assert!(nr < self.len, "bit {} out of range", nr);
        self.bitmap[nr / 64] |= 0b01_u64 << (nr % 64);
    }

    pub fn set_free(&mut self, nr: usize) {
        assert!(nr < self.len, "bit {} out of range", nr);
        self.bitmap[nr / 64] &= !(0b01_u64 << (nr % 64));
    }

    pub fn count_free(&self) -> usize {
        let used: u32 = self.bitmap.iter().map(|word| word.count_ones()).sum();
        self.len - used as usize
    }
}

/// Implements a naive allocation policy for inode and block numbers. This policy
/// retrieves the next available number after the last one handed out, wrapping
/// around once the end of the map is reached.
///
/// ## Other Pre-Allocation Policies
///
/// 1. Allocation that attempts to find enough contiguous available blocks so data can be allocated
///    close together (speed ups through sequential reads).
/// 2. Allocation that attempts to spread randomly over blocks to prevent wear of physical devices
///    in the front section (that may be rewritten many times before allocating to the back).
#[derive(Debug, Clone)]
pub struct FreePool {
    /// Keeps track of the next starting place for looking for available numbers.
    marker: usize,
    /// A simple bitmap tracking which numbers are allocated and which are free.
    bitmap: Bitmap,
}

impl FreePool {
    /// A pool of numbers `0..cap`, all free.
    pub fn new(cap: usize) -> Self {
        Self {
            marker: 0,
            bitmap: Bitmap::new(cap),
        }
    }

    /// Takes `nr` out of the pool. Returns false if it was already in use.
    pub fn reserve(&mut self, nr: u32) -> bool {
        let nr = nr as usize;
        if self.bitmap.get(nr) == State::Used {
            return false;
        }
        self.bitmap.set_reserved(nr);
        true
    }

    pub fn acquire(&mut self) -> Option<u32> {
        let cap = self.bitmap.len();
        let found = (self.marker..cap)
            .chain(0..self.marker)
            .find(|&nr| self.bitmap.get(nr) == State::Free)?;
        self.bitmap.set_reserved(found);
        self.marker = (found + 1) % cap;
        Some(found as u32)
    }

    pub fn release(&mut self, nr: u32) {
        self.bitmap.set_free(nr as usize);
    }

    pub fn is_used(&self, nr: u32) -> bool {
        (nr as usize) < self.bitmap.len() && self.bitmap.get(nr as usize) == State::Used
    }

    pub fn free_count(&self) -> usize {
        self.bitmap.count_free()
    }
}
