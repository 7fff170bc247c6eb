//! Property-based tests: the simplifier against the evaluator, and
//! shape trackers against a naive copying reference.

use lazyjax::expr::{EvalContext, Literal, ScalarExpr};
use lazyjax::Array;
use lazyjax::Shape;
use proptest::prelude::*;

// =============================================================================
// GENERATORS
// =============================================================================

/// Build a random integer expression over `gidx` from a seed stream.
/// Each seed byte picks an operation; constants come from the low bits.
fn expr_from_seeds(seeds: &[u8]) -> ScalarExpr {
    let mut stack = vec![ScalarExpr::gidx(1 << 16)];
    for &s in seeds {
        let c = (s as i32 % 7) - 3;
        let top = stack.last().unwrap().clone();
        let next = match s % 6 {
            0 => top.add(&ScalarExpr::i32(c)),
            1 => top.sub(&ScalarExpr::i32(c)),
            2 => top.mul(&ScalarExpr::i32(c)),
            3 => top.idiv(&ScalarExpr::i32(c.unsigned_abs().max(1) as i32)),
            4 => top.modulo(&ScalarExpr::i32(c.unsigned_abs().max(2) as i32)),
            _ => {
                let other = stack.first().unwrap().clone();
                ScalarExpr::select(&top.cmplt(&other), &top, &other)
            }
        };
        stack.push(next);
    }
    stack.pop().unwrap()
}

fn eval_at(e: &ScalarExpr, gidx: i32) -> Literal {
    let mut ctx = EvalContext::empty();
    ctx.bind("gidx", Literal::I32(gidx));
    e.evaluate(&ctx).unwrap()
}

// =============================================================================
// SIMPLIFIER PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn test_simplify_preserves_semantics(
        seeds in prop::collection::vec(any::<u8>(), 1..12),
        points in prop::collection::vec(0i32..1000, 1..8),
    ) {
        let e = expr_from_seeds(&seeds);
        let s = e.simplify();
        for &p in &points {
            prop_assert_eq!(
                eval_at(&e, p),
                eval_at(&s, p),
                "mismatch at gidx={}", p
            );
        }
    }

    #[test]
    fn test_simplify_idempotent(
        seeds in prop::collection::vec(any::<u8>(), 1..12),
    ) {
        let e = expr_from_seeds(&seeds);
        let once = e.simplify();
        let twice = once.simplify();
        prop_assert!(once == twice, "simplify not idempotent: {} vs {}", once, twice);
    }
}

// =============================================================================
// SHAPE TRACKER VS NAIVE COPYING REFERENCE
// =============================================================================

/// A reference array that copies data on every operation.
#[derive(Debug, Clone)]
struct Naive {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Naive {
    fn strides(shape: &[usize]) -> Vec<usize> {
        let mut s = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            s[i] = s[i + 1] * shape[i + 1];
        }
        s
    }

    fn unravel(shape: &[usize], mut flat: usize) -> Vec<usize> {
        let mut idx = vec![0; shape.len()];
        for d in (0..shape.len()).rev() {
            idx[d] = flat % shape[d];
            flat /= shape[d];
        }
        idx
    }

    fn ravel(shape: &[usize], idx: &[usize]) -> usize {
        Self::strides(shape)
            .iter()
            .zip(idx)
            .map(|(s, i)| s * i)
            .sum()
    }

    fn reshape(&self, shape: Vec<usize>) -> Naive {
        Naive {
            shape,
            data: self.data.clone(),
        }
    }

    fn permute(&self, perm: &[usize]) -> Naive {
        let shape: Vec<usize> = perm.iter().map(|&d| self.shape[d]).collect();
        let mut data = vec![0.0; self.data.len()];
        for (flat, v) in data.iter_mut().enumerate() {
            let idx = Self::unravel(&shape, flat);
            let mut src = vec![0; self.shape.len()];
            for (d, &p) in perm.iter().enumerate() {
                src[p] = idx[d];
            }
            *v = self.data[Self::ravel(&self.shape, &src)];
        }
        Naive { shape, data }
    }

    fn slice(&self, ranges: &[(usize, usize)]) -> Naive {
        let shape: Vec<usize> = ranges.iter().map(|&(b, e)| e - b).collect();
        let size: usize = shape.iter().product();
        let mut data = vec![0.0; size];
        for (flat, v) in data.iter_mut().enumerate() {
            let idx = Self::unravel(&shape, flat);
            let src: Vec<usize> = idx.iter().zip(ranges).map(|(&i, &(b, _))| i + b).collect();
            *v = self.data[Self::ravel(&self.shape, &src)];
        }
        Naive { shape, data }
    }

    fn pad(&self, padding: &[(usize, usize)]) -> Naive {
        let shape: Vec<usize> = self
            .shape
            .iter()
            .zip(padding)
            .map(|(&s, &(b, a))| b + s + a)
            .collect();
        let size: usize = shape.iter().product();
        let mut data = vec![0.0; size];
        for (flat, v) in data.iter_mut().enumerate() {
            let idx = Self::unravel(&shape, flat);
            let mut src = Vec::with_capacity(idx.len());
            let mut inside = true;
            for ((&i, &(b, _)), &s) in idx.iter().zip(padding).zip(&self.shape) {
                if i < b || i >= b + s {
                    inside = false;
                    break;
                }
                src.push(i - b);
            }
            if inside {
                *v = self.data[Self::ravel(&self.shape, &src)];
            }
        }
        Naive { shape, data }
    }

    fn flip(&self, axes: &[usize]) -> Naive {
        let mut data = vec![0.0; self.data.len()];
        for (flat, v) in data.iter_mut().enumerate() {
            let mut idx = Self::unravel(&self.shape, flat);
            for &a in axes {
                idx[a] = self.shape[a] - 1 - idx[a];
            }
            *v = self.data[Self::ravel(&self.shape, &idx)];
        }
        Naive {
            shape: self.shape.clone(),
            data,
        }
    }
}

/// Derive a legal view operation from a seed, given the current shape,
/// and apply it to both the lazy array and the reference.
fn apply_view_op(seed: u32, lazy: Array, naive: Naive) -> (Array, Naive) {
    let ndim = naive.shape.len();
    match seed % 5 {
        // reshape: collapse to flat, or split the first axis when even
        0 => {
            let total: usize = naive.shape.iter().product();
            let shape = if total % 2 == 0 && seed & 8 != 0 {
                vec![2, total / 2]
            } else {
                vec![total]
            };
            (
                lazy.reshape(&shape).unwrap(),
                naive.reshape(shape),
            )
        }
        // permute: rotate dimensions by one
        1 => {
            let perm: Vec<usize> = (0..ndim).map(|d| (d + 1) % ndim).collect();
            (lazy.permute(&perm).unwrap(), naive.permute(&perm))
        }
        // slice: drop the first element of the widest axis
        2 => {
            let widest = (0..ndim).max_by_key(|&d| naive.shape[d]).unwrap();
            let ranges: Vec<(usize, usize)> = naive
                .shape
                .iter()
                .enumerate()
                .map(|(d, &s)| if d == widest && s > 1 { (1, s) } else { (0, s) })
                .collect();
            (lazy.slice(&ranges).unwrap(), naive.slice(&ranges))
        }
        // pad: one cell before the first axis, one after the last
        3 => {
            let mut padding = vec![(0, 0); ndim];
            padding[0].0 = 1;
            padding[ndim - 1].1 = 1;
            (lazy.pad(&padding).unwrap(), naive.pad(&padding))
        }
        // flip the axis picked by the seed
        _ => {
            let axis = (seed as usize / 5) % ndim;
            (
                lazy.flip(&[axis as isize]).unwrap(),
                naive.flip(&[axis]),
            )
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn test_tracker_agrees_with_copying_reference(
        dims in prop::collection::vec(1usize..4, 1..3),
        ops in prop::collection::vec(any::<u32>(), 0..6),
    ) {
        let size: usize = dims.iter().product();
        let data: Vec<f32> = (0..size).map(|v| v as f32 + 1.0).collect();
        let mut lazy = Array::from_vec(data.clone(), Shape::new(dims.clone())).unwrap();
        let mut naive = Naive { shape: dims, data };

        for &seed in &ops {
            let (l, n) = apply_view_op(seed, lazy, naive);
            lazy = l;
            naive = n;
            prop_assert_eq!(lazy.shape().as_slice(), naive.shape.as_slice());
        }
        prop_assert_eq!(lazy.data().unwrap(), naive.data);
    }
}
