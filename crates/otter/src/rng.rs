/// Seeded jitter source for the initial placement.
///
/// SplitMix64 over a private counter, so a fixed seed always yields the same layout and no
/// global RNG is involved.
#[derive(Debug, Clone)]
pub(crate) struct SeedJitter {
    counter: u64,
}

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

impl SeedJitter {
    pub(crate) fn new(seed: u64) -> Self {
        Self { counter: seed }
    }

    fn next_bits(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(GOLDEN_GAMMA);
        let mut z = self.counter;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Offset in `[-scale, scale)`.
    pub(crate) fn offset(&mut self, scale: f64) -> f64 {
        let unit = (self.next_bits() >> 11) as f64 / (1u64 << 53) as f64;
        (unit * 2.0 - 1.0) * scale
    }
}
