//! Random number generation with splittable PRNG keys.
//!
//! Keys are explicit values: the same key always produces the same
//! stream, and independent streams come from `split`, never from hidden
//! state. The generator is the Threefry-2x32 counter-based bijection
//! with JAX's key schedule and rotation constants, so fixed seeds
//! reproduce the reference bit patterns.

use crate::array::Array;
use crate::{Error, Result, Shape};

/// A PRNG key: two 32-bit unsigned words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key([u32; 2]);

impl Key {
    /// The raw key words.
    pub fn words(&self) -> [u32; 2] {
        self.0
    }
}

/// Build a key by zero-padding a 32-bit seed into a two-word pair.
///
/// # Examples
///
/// ```
/// # use lazyjax::random;
/// let k = random::key(42);
/// assert_eq!(k.words(), [0, 42]);
/// ```
pub fn key(seed: u32) -> Key {
    Key([0, seed])
}

const ROTATIONS: [[u32; 4]; 2] = [[13, 15, 26, 6], [17, 29, 16, 24]];

/// The Threefry-2x32 block function.
fn threefry2x32(key: [u32; 2], count: [u32; 2]) -> [u32; 2] {
    let ks = [key[0], key[1], key[0] ^ key[1] ^ 0x1BD1_1BDA];
    let mut x = [count[0].wrapping_add(ks[0]), count[1].wrapping_add(ks[1])];
    for round in 0..5 {
        for &r in &ROTATIONS[round % 2] {
            x[0] = x[0].wrapping_add(x[1]);
            x[1] = x[1].rotate_left(r) ^ x[0];
        }
        x[0] = x[0].wrapping_add(ks[(round + 1) % 3]);
        x[1] = x[1]
            .wrapping_add(ks[(round + 2) % 3])
            .wrapping_add(round as u32 + 1);
    }
    x
}

/// Draw `n` random words in counter mode.
///
/// Counters `0..n` are split into two halves feeding the block inputs,
/// and the two output streams are concatenated, matching the reference
/// layout exactly for even `n`. An odd count pads with one zero
/// counter and folds the spare output word into the last element by
/// XOR.
fn random_words(key: Key, n: usize) -> Vec<u32> {
    if n == 0 {
        return Vec::new();
    }
    let padded = n + (n & 1);
    let half = padded / 2;
    let mut lo = Vec::with_capacity(half);
    let mut hi = Vec::with_capacity(half);
    for i in 0..half {
        let count_hi = if half + i < n { (half + i) as u32 } else { 0 };
        let out = threefry2x32(key.0, [i as u32, count_hi]);
        lo.push(out[0]);
        hi.push(out[1]);
    }
    let mut words = lo;
    words.extend(hi);
    if n & 1 == 1 {
        let spare = words.pop().expect("padded to even length");
        let last = words.last_mut().expect("n > 0");
        *last ^= spare;
    }
    words
}

/// Split a key into `n` independent keys.
///
/// # Examples
///
/// ```
/// # use lazyjax::random;
/// let keys = random::split(random::key(0), 2);
/// assert_eq!(keys[0].words(), [4146024105, 967050713]);
/// assert_eq!(keys[1].words(), [2718843009, 1272950319]);
/// ```
pub fn split(key: Key, n: usize) -> Vec<Key> {
    let words = random_words(key, 2 * n);
    (0..n).map(|i| Key([words[2 * i], words[2 * i + 1]])).collect()
}

/// Mix a data word into a key, deriving a new key.
pub fn fold_in(key: Key, data: u32) -> Key {
    let out = threefry2x32(key.0, [0, data]);
    Key(out)
}

/// Uniform random 32-bit words with the given shape.
pub fn bits(key: Key, shape: Shape) -> Result<Array> {
    let words = random_words(key, shape.size());
    Array::from_vec_u32(words, shape)
}

fn unit_float(word: u32) -> f32 {
    // Stuff the top mantissa bits into [1, 2), then shift down.
    f32::from_bits((word >> 9) | 0x3f80_0000) - 1.0
}

/// Uniform random floats in `[lo, hi)`.
pub fn uniform(key: Key, shape: Shape, lo: f32, hi: f32) -> Result<Array> {
    if !(lo < hi) {
        return Err(Error::Shape(format!(
            "uniform requires lo < hi, got [{}, {})",
            lo, hi
        )));
    }
    let data: Vec<f32> = random_words(key, shape.size())
        .into_iter()
        .map(|w| lo + (hi - lo) * unit_float(w))
        .collect();
    Array::from_vec(data, shape)
}

/// Standard normal samples via the Box-Muller transform over uniform
/// pairs.
pub fn normal(key: Key, shape: Shape) -> Result<Array> {
    let size = shape.size();
    let words = random_words(key, size + (size & 1));
    let mut data = Vec::with_capacity(size);
    let mut i = 0;
    while data.len() < size {
        let u1 = unit_float(words[i]).max(1e-10);
        let u2 = unit_float(words[i + 1]);
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f32::consts::PI * u2;
        data.push(r * theta.cos());
        if data.len() < size {
            data.push(r * theta.sin());
        }
        i += 2;
    }
    Array::from_vec(data, shape)
}

/// Bernoulli samples with probability `p` of true.
pub fn bernoulli(key: Key, p: f32, shape: Shape) -> Result<Array> {
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::Shape(format!("p must be in [0, 1], got {}", p)));
    }
    let data: Vec<bool> = random_words(key, shape.size())
        .into_iter()
        .map(|w| unit_float(w) < p)
        .collect();
    Array::from_vec_bool(data, shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_zero_pads_seed() {
        assert_eq!(key(0).words(), [0, 0]);
        assert_eq!(key(7).words(), [0, 7]);
    }

    #[test]
    fn test_bits_scalar_reference_value() {
        let b = bits(key(0), Shape::scalar()).unwrap();
        assert_eq!(b.data_u32().unwrap(), vec![4070199207]);
    }

    #[test]
    fn test_bits_even_matches_reference_layout() {
        let b = bits(key(0), Shape::new(vec![4])).unwrap();
        assert_eq!(
            b.data_u32().unwrap(),
            vec![4146024105, 967050713, 2718843009, 1272950319]
        );
    }

    #[test]
    fn test_split_reference_matrix() {
        let keys = split(key(0), 3);
        assert_eq!(keys[0].words(), [2467461003, 428148500]);
        assert_eq!(keys[1].words(), [3186719485, 3840466878]);
        assert_eq!(keys[2].words(), [2562233961, 1946702221]);
    }

    #[test]
    fn test_split_two_matches_reference() {
        let keys = split(key(0), 2);
        assert_eq!(keys[0].words(), [4146024105, 967050713]);
        assert_eq!(keys[1].words(), [2718843009, 1272950319]);
    }

    #[test]
    fn test_determinism_and_independence() {
        let a = bits(key(5), Shape::new(vec![8])).unwrap().data_u32().unwrap();
        let b = bits(key(5), Shape::new(vec![8])).unwrap().data_u32().unwrap();
        assert_eq!(a, b);
        let c = bits(key(6), Shape::new(vec![8])).unwrap().data_u32().unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_uniform_range() {
        let u = uniform(key(1), Shape::new(vec![100]), -2.0, 3.0).unwrap();
        for v in u.data().unwrap() {
            assert!((-2.0..3.0).contains(&v), "out of range: {}", v);
        }
        assert!(uniform(key(1), Shape::scalar(), 1.0, 1.0).is_err());
    }

    #[test]
    fn test_uniform_scalar_reference_value() {
        let u = uniform(key(0), Shape::scalar(), 0.0, 1.0).unwrap();
        assert!((u.item().unwrap() - 0.947667).abs() < 1e-6);
    }

    #[test]
    fn test_normal_moments() {
        let n = normal(key(3), Shape::new(vec![2048])).unwrap().data().unwrap();
        let mean: f32 = n.iter().sum::<f32>() / n.len() as f32;
        let var: f32 =
            n.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n.len() as f32;
        assert!(mean.abs() < 0.1, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.15, "variance {}", var);
    }

    #[test]
    fn test_bernoulli() {
        let b = bernoulli(key(9), 0.25, Shape::new(vec![4000])).unwrap();
        let ones = b.data_bool().unwrap().iter().filter(|&&v| v).count();
        let rate = ones as f32 / 4000.0;
        assert!((rate - 0.25).abs() < 0.05, "rate {}", rate);
    }

    #[test]
    fn test_fold_in_derives_distinct_keys() {
        let base = key(0);
        assert_ne!(fold_in(base, 0), fold_in(base, 1));
        assert_eq!(fold_in(base, 1), fold_in(base, 1));
    }
}
