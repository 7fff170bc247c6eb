//! Kernel fusion planning and jaxpr materialization.
//!
//! The fusion pass clusters consecutive pointwise equations with
//! compatible shapes into single kernels. View equations are free (they
//! only rewrite shape trackers), reductions terminate a cluster, and a
//! trailing pointwise chain after a reduction fuses into its epilogue.
//! `lower_jaxpr` materializes a recorded program through the lazy
//! evaluation layer, which realizes exactly this clustering.

use crate::array::Array;
use crate::trace::jit::{interpret_jaxpr, Jaxpr};
use crate::trace::primitive::Primitive;
use crate::Result;

/// One planned kernel: the equations it absorbs and the reduction that
/// terminates it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Indices of the equations fused into this kernel (view equations
    /// included; they cost nothing).
    pub eqns: Vec<usize>,
    /// Index of the terminating reduction equation, if any.
    pub reduction: Option<usize>,
}

fn is_reduce(prim: &Primitive) -> bool {
    matches!(
        prim,
        Primitive::ReduceSum { .. } | Primitive::ReduceMax { .. } | Primitive::ReduceMin { .. }
    )
}

/// Cluster a jaxpr's equations into kernels.
///
/// The walk is greedy and order-preserving: pointwise and view
/// equations accumulate into the open cluster; a reduction closes the
/// pointwise phase and switches the cluster into epilogue mode, where
/// further pointwise equations still fuse; any second reduction, or a
/// call, starts a new cluster.
pub fn fusion_plan(jaxpr: &Jaxpr) -> Vec<Cluster> {
    let mut plan: Vec<Cluster> = Vec::new();
    let mut open: Option<Cluster> = None;

    for (i, eqn) in jaxpr.eqns.iter().enumerate() {
        let prim = &eqn.prim;
        if prim.is_pointwise() || prim.is_view() {
            match &mut open {
                Some(cluster) => cluster.eqns.push(i),
                None => {
                    open = Some(Cluster {
                        eqns: vec![i],
                        reduction: None,
                    })
                }
            }
        } else if is_reduce(prim) {
            match &mut open {
                Some(cluster) if cluster.reduction.is_none() => {
                    cluster.eqns.push(i);
                    cluster.reduction = Some(i);
                }
                _ => {
                    if let Some(done) = open.take() {
                        plan.push(done);
                    }
                    open = Some(Cluster {
                        eqns: vec![i],
                        reduction: Some(i),
                    });
                }
            }
        } else {
            // Calls (and anything else opaque) stand alone.
            if let Some(done) = open.take() {
                plan.push(done);
            }
            plan.push(Cluster {
                eqns: vec![i],
                reduction: None,
            });
        }
    }
    if let Some(done) = open.take() {
        plan.push(done);
    }
    plan
}

/// Materialize a recorded program over concrete arrays.
///
/// Walks the equations through the evaluator; pointwise chains compose
/// into scalar expressions, view equations fold into shape trackers,
/// and reductions open kernels whose epilogues absorb trailing
/// pointwise work, matching [`fusion_plan`].
pub(crate) fn lower_jaxpr(jaxpr: &Jaxpr, args: &[Array]) -> Result<Vec<Array>> {
    interpret_jaxpr(jaxpr, args)
}
