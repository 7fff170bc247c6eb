//! Einstein summation with contraction-path planning.
//!
//! `einsum` parses subscripts, plans a pairwise contraction order (an
//! exhaustive optimal search for small operand counts, greedy beyond),
//! and executes each contraction as broadcast-multiply plus sum, so the
//! whole expression stays lazy and traceable.

use crate::array::Array;
use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap};

/// Path-planning strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PathKind {
    /// Exhaustive search over contraction orders (factorial; fine for a
    /// handful of operands).
    Optimal,
    /// Cheapest-pair-first greedy search.
    Greedy,
}

/// A planned contraction order and its floating-point cost.
///
/// Path entries name operand ids: originals are `0..n`, every
/// intermediate takes the next id as it is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EinsumPath {
    /// Pairs of operand ids, in contraction order.
    pub path: Vec<(usize, usize)>,
    /// Total multiply-add FLOPs (2 per multiply-accumulate).
    pub flops: u64,
}

/// Parse subscripts into per-input index lists and the output list.
///
/// With no `->`, the output is the alphabetically sorted set of indices
/// appearing exactly once.
fn parse(subscripts: &str) -> Result<(Vec<Vec<char>>, Vec<char>)> {
    let parts: Vec<&str> = subscripts.split("->").collect();
    if parts.len() > 2 {
        return Err(Error::Shape(format!(
            "invalid einsum subscripts {:?}: more than one '->'",
            subscripts
        )));
    }
    let inputs: Vec<Vec<char>> = parts[0]
        .split(',')
        .map(|term| term.trim().chars().collect())
        .collect();
    for term in &inputs {
        for &c in term {
            if !c.is_ascii_alphabetic() {
                return Err(Error::Shape(format!(
                    "invalid einsum index {:?} in {:?}",
                    c, subscripts
                )));
            }
        }
    }
    let output: Vec<char> = match parts.get(1) {
        Some(out) => out.trim().chars().collect(),
        None => {
            let mut counts: HashMap<char, usize> = HashMap::new();
            for term in &inputs {
                for &c in term {
                    *counts.entry(c).or_insert(0) += 1;
                }
            }
            let mut once: Vec<char> = counts
                .into_iter()
                .filter(|&(_, n)| n == 1)
                .map(|(c, _)| c)
                .collect();
            once.sort_unstable();
            once
        }
    };
    Ok((inputs, output))
}

/// Map every index letter to its dimension, checking consistency.
fn index_dims(
    inputs: &[Vec<char>],
    shapes: &[&[usize]],
) -> Result<HashMap<char, usize>> {
    if inputs.len() != shapes.len() {
        return Err(Error::Shape(format!(
            "{} subscript terms for {} operands",
            inputs.len(),
            shapes.len()
        )));
    }
    let mut dims = HashMap::new();
    for (term, shape) in inputs.iter().zip(shapes) {
        if term.len() != shape.len() {
            return Err(Error::Shape(format!(
                "subscripts {:?} do not match operand rank {}",
                term.iter().collect::<String>(),
                shape.len()
            )));
        }
        for (&c, &s) in term.iter().zip(*shape) {
            match dims.get(&c) {
                Some(&prev) if prev != s => {
                    return Err(Error::Shape(format!(
                        "index '{}' is {} in one operand and {} in another",
                        c, prev, s
                    )))
                }
                _ => {
                    dims.insert(c, s);
                }
            }
        }
    }
    Ok(dims)
}

fn cost_of(union: &BTreeSet<char>, dims: &HashMap<char, usize>) -> u64 {
    2 * union.iter().map(|c| dims[c] as u64).product::<u64>()
}

/// Indices an intermediate must keep: those in the output or in any
/// other remaining operand.
fn kept_indices(
    union: &BTreeSet<char>,
    others: &[&BTreeSet<char>],
    output: &BTreeSet<char>,
) -> BTreeSet<char> {
    union
        .iter()
        .copied()
        .filter(|c| output.contains(c) || others.iter().any(|o| o.contains(c)))
        .collect()
}

fn optimal_search(
    ops: &[(usize, BTreeSet<char>)],
    next_id: usize,
    output: &BTreeSet<char>,
    dims: &HashMap<char, usize>,
    spent: u64,
    path: &mut Vec<(usize, usize)>,
    best: &mut Option<(u64, Vec<(usize, usize)>)>,
) {
    if ops.len() <= 1 {
        if best.as_ref().map_or(true, |(f, _)| spent < *f) {
            *best = Some((spent, path.clone()));
        }
        return;
    }
    for i in 0..ops.len() {
        for j in (i + 1)..ops.len() {
            let union: BTreeSet<char> = ops[i].1.union(&ops[j].1).copied().collect();
            let cost = spent + cost_of(&union, dims);
            if best.as_ref().is_some_and(|(f, _)| cost >= *f) {
                continue;
            }
            let others: Vec<&BTreeSet<char>> = ops
                .iter()
                .enumerate()
                .filter(|&(k, _)| k != i && k != j)
                .map(|(_, (_, s))| s)
                .collect();
            let keep = kept_indices(&union, &others, output);
            let mut rest: Vec<(usize, BTreeSet<char>)> = ops
                .iter()
                .enumerate()
                .filter(|&(k, _)| k != i && k != j)
                .map(|(_, o)| o.clone())
                .collect();
            rest.push((next_id, keep));
            path.push((ops[i].0, ops[j].0));
            optimal_search(&rest, next_id + 1, output, dims, cost, path, best);
            path.pop();
        }
    }
}

fn greedy_search(
    mut ops: Vec<(usize, BTreeSet<char>)>,
    mut next_id: usize,
    output: &BTreeSet<char>,
    dims: &HashMap<char, usize>,
) -> (u64, Vec<(usize, usize)>) {
    let mut flops = 0;
    let mut path = Vec::new();
    while ops.len() > 1 {
        let mut pick = (0, 1);
        let mut pick_cost = u64::MAX;
        for i in 0..ops.len() {
            for j in (i + 1)..ops.len() {
                let union: BTreeSet<char> = ops[i].1.union(&ops[j].1).copied().collect();
                let cost = cost_of(&union, dims);
                if cost < pick_cost {
                    pick = (i, j);
                    pick_cost = cost;
                }
            }
        }
        let (i, j) = pick;
        let union: BTreeSet<char> = ops[i].1.union(&ops[j].1).copied().collect();
        let others: Vec<&BTreeSet<char>> = ops
            .iter()
            .enumerate()
            .filter(|&(k, _)| k != i && k != j)
            .map(|(_, (_, s))| s)
            .collect();
        let keep = kept_indices(&union, &others, output);
        path.push((ops[i].0, ops[j].0));
        flops += pick_cost;
        ops.remove(j);
        ops.remove(i);
        ops.push((next_id, keep));
        next_id += 1;
    }
    (flops, path)
}

/// Plan a contraction order for the given subscripts and shapes.
///
/// # Examples
///
/// ```
/// # use lazyjax::ops::einsum::{einsum_path, PathKind};
/// let plan = einsum_path(
///     "ij,jk,kl->il",
///     &[&[10, 20], &[20, 30], &[30, 40]],
///     PathKind::Optimal,
/// )
/// .unwrap();
/// assert_eq!(plan.path, vec![(0, 1), (2, 3)]);
/// assert_eq!(plan.flops, 2 * (10 * 30 * 20 + 10 * 40 * 30));
/// ```
pub fn einsum_path(
    subscripts: &str,
    shapes: &[&[usize]],
    kind: PathKind,
) -> Result<EinsumPath> {
    let (inputs, output) = parse(subscripts)?;
    let dims = index_dims(&inputs, shapes)?;
    let output_set: BTreeSet<char> = output.iter().copied().collect();
    let ops: Vec<(usize, BTreeSet<char>)> = inputs
        .iter()
        .enumerate()
        .map(|(i, term)| (i, term.iter().copied().collect()))
        .collect();

    if ops.len() < 2 {
        return Ok(EinsumPath {
            path: Vec::new(),
            flops: 0,
        });
    }
    let (flops, path) = match kind {
        PathKind::Optimal => {
            let mut best = None;
            let mut scratch = Vec::new();
            optimal_search(
                &ops,
                ops.len(),
                &output_set,
                &dims,
                0,
                &mut scratch,
                &mut best,
            );
            best.expect("at least one contraction order exists")
        }
        PathKind::Greedy => greedy_search(ops, inputs.len(), &output_set, &dims),
    };
    Ok(EinsumPath { path, flops })
}

/// Collapse repeated indices inside one operand to its diagonal.
fn take_diagonals(mut array: Array, mut term: Vec<char>) -> Result<(Array, Vec<char>)> {
    loop {
        let dup = term.iter().enumerate().find_map(|(i, &c)| {
            term[i + 1..]
                .iter()
                .position(|&d| d == c)
                .map(|off| (i, i + 1 + off))
        });
        let Some((a, b)) = dup else {
            return Ok((array, term));
        };
        // Move both occurrences to the end, then take the diagonal by
        // flattening to rows of n*n and keeping every (n+1)-th element.
        let ndim = array.ndim();
        array = array
            .moveaxis(a as isize, ndim as isize - 1)?
            .moveaxis(b as isize - 1, ndim as isize - 1)?;
        let shape = array.shape().as_slice().to_vec();
        let n = shape[ndim - 1];
        let batch: Vec<usize> = shape[..ndim - 2].to_vec();

        let mut flat = batch.clone();
        flat.push(n * n);
        let mut padded_shape = batch.clone();
        padded_shape.extend([n, n + 1]);
        let mut pad = vec![(0, 0); batch.len() + 1];
        pad[batch.len()] = (0, n);
        let mut keep_ranges: Vec<(usize, usize)> = batch.iter().map(|&s| (0, s)).collect();
        keep_ranges.extend([(0, n), (0, 1)]);
        let mut out_shape = batch.clone();
        out_shape.push(n);

        array = array
            .reshape(&flat)?
            .pad(&pad)?
            .reshape(&padded_shape)?
            .slice(&keep_ranges)?
            .reshape(&out_shape)?;

        let c = term[a];
        term.remove(b);
        term.remove(a);
        term.push(c);
    }
}

/// Contract two labeled operands, keeping only `keep` indices.
fn contract_pair(
    a: (Array, Vec<char>),
    b: (Array, Vec<char>),
    keep: &BTreeSet<char>,
    dims: &HashMap<char, usize>,
) -> Result<(Array, Vec<char>)> {
    let (a_arr, a_idx) = a;
    let (b_arr, b_idx) = b;
    let mut union = a_idx.clone();
    for &c in &b_idx {
        if !union.contains(&c) {
            union.push(c);
        }
    }
    let union_shape: Vec<usize> = union.iter().map(|c| dims[c]).collect();

    // Align a: its indices are a prefix of the union order.
    let mut a_shape: Vec<usize> = a_idx.iter().map(|c| dims[c]).collect();
    a_shape.extend(std::iter::repeat(1).take(union.len() - a_idx.len()));
    let a_full = a_arr.reshape(&a_shape)?.broadcast_to(&union_shape)?;

    // Align b: permute into union order, then insert missing dims.
    let b_order: Vec<usize> = union
        .iter()
        .filter_map(|c| b_idx.iter().position(|d| d == c))
        .collect();
    let b_perm = b_arr.permute(&b_order)?;
    let mut b_shape = Vec::with_capacity(union.len());
    for c in &union {
        b_shape.push(if b_idx.contains(c) { dims[c] } else { 1 });
    }
    let b_full = b_perm.reshape(&b_shape)?.broadcast_to(&union_shape)?;

    let prod = a_full.mul(&b_full)?;
    let summed: Vec<isize> = union
        .iter()
        .enumerate()
        .filter(|(_, c)| !keep.contains(c))
        .map(|(i, _)| i as isize)
        .collect();
    let out = if summed.is_empty() {
        prod
    } else {
        prod.sum_axes(&summed, false)?
    };
    let out_idx: Vec<char> = union.into_iter().filter(|c| keep.contains(c)).collect();
    Ok((out, out_idx))
}

/// Finish a single labeled operand: sum out non-output indices and
/// permute into the requested order.
fn finish(operand: (Array, Vec<char>), output: &[char]) -> Result<Array> {
    let (mut array, mut idx) = operand;
    let summed: Vec<isize> = idx
        .iter()
        .enumerate()
        .filter(|(_, c)| !output.contains(c))
        .map(|(i, _)| i as isize)
        .collect();
    if !summed.is_empty() {
        array = array.sum_axes(&summed, false)?;
        idx = idx.into_iter().filter(|c| output.contains(c)).collect();
    }
    if idx.len() != output.len() {
        return Err(Error::Shape(format!(
            "einsum output indices {:?} do not cover {:?}",
            idx, output
        )));
    }
    if idx != output {
        let perm: Vec<usize> = output
            .iter()
            .map(|c| idx.iter().position(|d| d == c).expect("covered above"))
            .collect();
        array = array.permute(&perm)?;
    }
    Ok(array)
}

/// Einstein summation over the given operands.
///
/// # Examples
///
/// ```
/// # use lazyjax::ops::einsum::einsum;
/// # use lazyjax::{Array, Shape};
/// let a = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0], Shape::new(vec![2, 2])).unwrap();
/// let b = Array::from_vec(vec![5.0, 6.0, 7.0, 8.0], Shape::new(vec![2, 2])).unwrap();
/// let c = einsum("ij,jk->ik", &[&a, &b]).unwrap();
/// assert_eq!(c.data().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
/// ```
pub fn einsum(subscripts: &str, arrays: &[&Array]) -> Result<Array> {
    let (inputs, output) = parse(subscripts)?;
    let shapes: Vec<Vec<usize>> = arrays
        .iter()
        .map(|a| a.shape().as_slice().to_vec())
        .collect();
    let shape_refs: Vec<&[usize]> = shapes.iter().map(|s| s.as_slice()).collect();
    let dims = index_dims(&inputs, &shape_refs)?;
    let output_set: BTreeSet<char> = output.iter().copied().collect();

    // Collapse diagonals first so every operand has unique indices.
    let mut operands: Vec<Option<(usize, (Array, Vec<char>))>> = Vec::new();
    for (i, (array, term)) in arrays.iter().zip(&inputs).enumerate() {
        let labeled = take_diagonals((*array).clone(), term.clone())?;
        operands.push(Some((i, labeled)));
    }

    if operands.len() == 1 {
        let (_, labeled) = operands.pop().unwrap().unwrap();
        return finish(labeled, &output);
    }

    let kind = if arrays.len() <= 5 {
        PathKind::Optimal
    } else {
        PathKind::Greedy
    };
    let plan = einsum_path(subscripts, &shape_refs, kind)?;

    let mut next_id = arrays.len();
    for &(i, j) in &plan.path {
        let pos_i = operands
            .iter()
            .position(|o| o.as_ref().is_some_and(|(id, _)| *id == i))
            .expect("path references a live operand");
        let a = operands[pos_i].take().unwrap().1;
        let pos_j = operands
            .iter()
            .position(|o| o.as_ref().is_some_and(|(id, _)| *id == j))
            .expect("path references a live operand");
        let b = operands[pos_j].take().unwrap().1;

        let others: Vec<BTreeSet<char>> = operands
            .iter()
            .flatten()
            .map(|(_, (_, idx))| idx.iter().copied().collect())
            .collect();
        let other_refs: Vec<&BTreeSet<char>> = others.iter().collect();
        let union: BTreeSet<char> = a.1.iter().chain(b.1.iter()).copied().collect();
        let keep = kept_indices(&union, &other_refs, &output_set);

        let contracted = contract_pair(a, b, &keep, &dims)?;
        operands.retain(|o| o.is_some());
        operands.push(Some((next_id, contracted)));
        next_id += 1;
    }

    let (_, labeled) = operands
        .into_iter()
        .flatten()
        .next()
        .expect("one operand remains");
    finish(labeled, &output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn arr(data: Vec<f32>, shape: Vec<usize>) -> Array {
        Array::from_vec(data, Shape::new(shape)).unwrap()
    }

    #[test]
    fn test_matmul_einsum() {
        let a = arr(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = arr(vec![5.0, 6.0, 7.0, 8.0], vec![2, 2]);
        let c = einsum("ij,jk->ik", &[&a, &b]).unwrap();
        assert_eq!(c.data().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_transpose_einsum() {
        let a = arr(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
        let t = einsum("ij->ji", &[&a]).unwrap();
        assert_eq!(t.shape().as_slice(), &[3, 2]);
        assert_eq!(t.data().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_trace_and_diagonal() {
        let a = arr(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        assert_eq!(einsum("ii->", &[&a]).unwrap().item().unwrap(), 5.0);
        assert_eq!(
            einsum("ii->i", &[&a]).unwrap().data().unwrap(),
            vec![1.0, 4.0]
        );
    }

    #[test]
    fn test_outer_and_inner_products() {
        let a = arr(vec![1.0, 2.0, 3.0], vec![3]);
        let b = arr(vec![4.0, 5.0], vec![2]);
        let outer = einsum("i,j->ij", &[&a, &b]).unwrap();
        assert_eq!(
            outer.data().unwrap(),
            vec![4.0, 5.0, 8.0, 10.0, 12.0, 15.0]
        );

        let c = arr(vec![4.0, 5.0, 6.0], vec![3]);
        assert_eq!(einsum("i,i->", &[&a, &c]).unwrap().item().unwrap(), 32.0);
    }

    #[test]
    fn test_batched_matmul() {
        let a = arr(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            vec![2, 2, 2],
        );
        let b = arr(
            vec![1.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 2.0],
            vec![2, 2, 2],
        );
        let c = einsum("bij,bjk->bik", &[&a, &b]).unwrap();
        assert_eq!(
            c.data().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 10.0, 12.0, 14.0, 16.0]
        );
    }

    #[test]
    fn test_chain_uses_optimal_path() {
        let plan = einsum_path(
            "ij,jk,kl->il",
            &[&[10, 20], &[20, 30], &[30, 40]],
            PathKind::Optimal,
        )
        .unwrap();
        assert_eq!(plan.path, vec![(0, 1), (2, 3)]);
        assert_eq!(plan.flops, 2 * (10 * 30 * 20 + 10 * 40 * 30));
    }

    #[test]
    fn test_chain_execution() {
        let a = arr(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = arr(vec![2.0, 0.0, 0.0, 2.0], vec![2, 2]);
        let c = arr(vec![1.0, 1.0, 1.0, 1.0], vec![2, 2]);
        let out = einsum("ij,jk,kl->il", &[&a, &b, &c]).unwrap();
        assert_eq!(out.data().unwrap(), vec![6.0, 6.0, 14.0, 14.0]);
    }

    #[test]
    fn test_implicit_output() {
        // "ij,jk" drops the repeated j and sorts survivors: "ik".
        let a = arr(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = arr(vec![5.0, 6.0, 7.0, 8.0], vec![2, 2]);
        let c = einsum("ij,jk", &[&a, &b]).unwrap();
        assert_eq!(c.data().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_sum_axis_einsum() {
        let a = arr(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
        assert_eq!(einsum("ij->i", &[&a]).unwrap().data().unwrap(), vec![6.0, 15.0]);
        assert_eq!(einsum("ij->j", &[&a]).unwrap().data().unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = arr(vec![1.0, 2.0], vec![2]);
        let b = arr(vec![1.0, 2.0, 3.0], vec![3]);
        assert!(matches!(
            einsum("i,i->", &[&a, &b]),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn test_greedy_path_exists() {
        let plan = einsum_path(
            "ij,jk,kl->il",
            &[&[10, 20], &[20, 30], &[30, 40]],
            PathKind::Greedy,
        )
        .unwrap();
        assert_eq!(plan.path.len(), 2);
        assert!(plan.flops >= 2 * (10 * 30 * 20 + 10 * 40 * 30));
    }
}
