/// xoroshiro128+ with the original rotation and shift constants (a = 24,
/// b = 16, c = 37). The 64-bit seed is expanded into the 128-bit state with
/// splitmix64, so any seed, including 0, gives a non-zero state.
///
/// Allocation-free and cheap enough to call per sample. Not for anything
/// that needs unpredictability.
#[derive(Debug, Copy, Clone)]
pub struct Xoroshiro {
    s0: u64,
    s1: u64,
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl Xoroshiro {
    pub fn new(seed: u64) -> Self {
        let mut state = seed;
        let s0 = splitmix64(&mut state);
        let s1 = splitmix64(&mut state);
        if s0 == 0 && s1 == 0 {
            return Self { s0: 1, s1: 0 };
        }
        Self { s0, s1 }
    }

    pub fn next(&mut self) -> u64 {
        let s0 = self.s0;
        let mut s1 = self.s1;
        let r = s0.wrapping_add(s1);

        s1 ^= s0;
        self.s0 = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.s1 = s1.rotate_left(37);
        r
    }

    /// Uniform in `[0, 1)`.
    pub fn next_float(&mut self) -> f32 {
        let m = 1u64 << 24;
        ((self.next() % m) as f64 / m as f64) as f32
    }

    /// Uniform in `0..bound`. Returns 0 for an empty range.
    pub fn next_below(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (self.next() % bound as u64) as usize
    }

    /// Uniform in `-range..=range`.
    pub fn next_offset(&mut self, range: i32) -> i32 {
        if range <= 0 {
            return 0;
        }
        self.next_below(2 * range as usize + 1) as i32 - range
    }
}
