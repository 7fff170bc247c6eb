//! Just-in-time tracing: recording straight-line programs and caching
//! them by input signature.
//!
//! `jit(f)` traces `f` once per distinct signature (shapes, dtypes) into
//! a jaxpr: typed input binders, a sequence of primitive equations, and
//! output variables. Concrete arrays captured during tracing become
//! leading constant binders. Calls re-emit a single `JitCall` primitive
//! so outer transforms see one unit they can transform and memoize.

use crate::array::Array;
use crate::trace::interpreter::{bind, TraceGuard, TraceKind, TracerValue};
use crate::trace::primitive::{abstract_eval, AbstractValue, Primitive};
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

/// One recorded primitive application.
#[derive(Debug, Clone)]
pub struct Eqn {
    /// The primitive applied
    pub prim: Primitive,
    /// Input variable ids
    pub inputs: Vec<usize>,
    /// Output variable ids
    pub outputs: Vec<usize>,
}

/// A recorded straight-line program.
///
/// Variable ids index `vars`; the first `invars.len()` ids are the
/// binders, of which the first `num_consts` are captured constants.
#[derive(Debug)]
pub struct Jaxpr {
    /// Abstract values of the binders, constants first
    pub invars: Vec<AbstractValue>,
    /// Abstract values of every variable
    pub vars: Vec<AbstractValue>,
    /// Equations in recorded order
    pub eqns: Vec<Eqn>,
    /// Output variable ids
    pub outvars: Vec<usize>,
    /// Number of leading constant binders
    pub num_consts: usize,
}

impl Jaxpr {
    /// Abstract values of the outputs.
    pub fn out_avals(&self) -> Vec<AbstractValue> {
        self.outvars.iter().map(|&v| self.vars[v].clone()).collect()
    }
}

/// Mutable state while recording a jaxpr.
pub(crate) struct JaxprBuilder {
    vars: Vec<AbstractValue>,
    eqns: Vec<Eqn>,
    consts: Vec<(usize, Array)>,
    const_keys: FxHashMap<usize, usize>,
    arg_vars: Vec<usize>,
}

impl JaxprBuilder {
    pub fn new() -> JaxprBuilder {
        JaxprBuilder {
            vars: Vec::new(),
            eqns: Vec::new(),
            consts: Vec::new(),
            const_keys: FxHashMap::default(),
            arg_vars: Vec::new(),
        }
    }

    fn fresh(&mut self, aval: AbstractValue) -> usize {
        self.vars.push(aval);
        self.vars.len() - 1
    }

    /// Bind an argument variable.
    pub fn arg(&mut self, aval: AbstractValue) -> usize {
        let var = self.fresh(aval);
        self.arg_vars.push(var);
        var
    }

    /// Promote a concrete array into a captured-constant binder,
    /// deduplicated by array identity.
    pub fn lift_const(&mut self, array: &Array) -> Result<usize> {
        let lazy = array.concrete()?;
        let key = lazy.identity();
        if let Some(&var) = self.const_keys.get(&key) {
            return Ok(var);
        }
        let var = self.fresh(array.aval().clone());
        self.consts.push((var, array.clone()));
        self.const_keys.insert(key, var);
        Ok(var)
    }

    /// Record an equation, creating its output variables.
    pub fn eqn(
        &mut self,
        prim: Primitive,
        inputs: Vec<usize>,
        out_avals: Vec<AbstractValue>,
    ) -> Vec<usize> {
        let outputs: Vec<usize> = out_avals.into_iter().map(|a| self.fresh(a)).collect();
        self.eqns.push(Eqn {
            prim,
            inputs,
            outputs: outputs.clone(),
        });
        outputs
    }

    pub fn aval(&self, var: usize) -> AbstractValue {
        self.vars[var].clone()
    }

    /// Close the recording: renumber so constants come first, then
    /// arguments, then intermediates.
    pub fn finalize(self, outvars: Vec<usize>) -> (Jaxpr, Vec<Array>) {
        let num_consts = self.consts.len();
        let mut order: Vec<usize> = self.consts.iter().map(|(v, _)| *v).collect();
        order.extend(&self.arg_vars);
        for v in 0..self.vars.len() {
            if !order.contains(&v) {
                order.push(v);
            }
        }
        let mut renumber = vec![0usize; self.vars.len()];
        for (new, &old) in order.iter().enumerate() {
            renumber[old] = new;
        }

        let vars: Vec<AbstractValue> = order.iter().map(|&v| self.vars[v].clone()).collect();
        let invars = vars[..num_consts + self.arg_vars.len()].to_vec();
        let eqns = self
            .eqns
            .into_iter()
            .map(|e| Eqn {
                prim: e.prim,
                inputs: e.inputs.iter().map(|&v| renumber[v]).collect(),
                outputs: e.outputs.iter().map(|&v| renumber[v]).collect(),
            })
            .collect();
        let outvars = outvars.into_iter().map(|v| renumber[v]).collect();
        let consts = self.consts.into_iter().map(|(_, a)| a).collect();
        (
            Jaxpr {
                invars,
                vars,
                eqns,
                outvars,
                num_consts,
            },
            consts,
        )
    }
}

/// Record a primitive application into the builder at `level`.
pub(crate) fn process_jit(
    prim: &Primitive,
    inputs: &[Array],
    level: usize,
    builder: &Arc<Mutex<JaxprBuilder>>,
) -> Result<Vec<Array>> {
    let mut var_ids = Vec::with_capacity(inputs.len());
    for a in inputs {
        let var = match a.value() {
            TracerValue::Jit(v) if v.level == level => v.var,
            TracerValue::Concrete(_) => builder.lock().unwrap().lift_const(a)?,
            other if other.level() < level => {
                return Err(Error::Unsupported(
                    "cannot stage a tracer from an enclosing transform into jit".into(),
                ))
            }
            _ => unreachable!("operand above the dispatching level"),
        };
        var_ids.push(var);
    }

    let in_avals: Vec<AbstractValue> = {
        let b = builder.lock().unwrap();
        var_ids.iter().map(|&v| b.aval(v)).collect()
    };
    let out_avals = abstract_eval(prim, &in_avals)?;
    let out_ids = builder
        .lock()
        .unwrap()
        .eqn(prim.clone(), var_ids, out_avals.clone());

    Ok(out_ids
        .into_iter()
        .zip(out_avals)
        .map(|(var, aval)| Array::from_jit_var(level, var, aval))
        .collect())
}

/// Trace `f` at the given input signature into a jaxpr plus its
/// captured constants.
pub(crate) fn trace_jaxpr<F>(f: &F, avals: &[AbstractValue]) -> Result<(Arc<Jaxpr>, Vec<Array>)>
where
    F: Fn(&[Array]) -> Result<Vec<Array>>,
{
    let builder = Arc::new(Mutex::new(JaxprBuilder::new()));
    let outvars = {
        let guard = TraceGuard::push(TraceKind::Jit(builder.clone()), true);
        let level = guard.level();

        let args: Vec<Array> = avals
            .iter()
            .map(|aval| {
                let var = builder.lock().unwrap().arg(aval.clone());
                Array::from_jit_var(level, var, aval.clone())
            })
            .collect();

        let outs = f(&args)?;
        let mut outvars = Vec::with_capacity(outs.len());
        for out in &outs {
            let var = match out.value() {
                TracerValue::Jit(v) if v.level == level => v.var,
                TracerValue::Concrete(_) => builder.lock().unwrap().lift_const(out)?,
                _ => {
                    return Err(Error::Unsupported(
                        "jit output belongs to an enclosing transform".into(),
                    ))
                }
            };
            outvars.push(var);
        }
        outvars
    };

    let builder = Arc::try_unwrap(builder)
        .map_err(|_| Error::Unsupported("jit recording still referenced".into()))?
        .into_inner()
        .unwrap();
    let (jaxpr, consts) = builder.finalize(outvars);
    Ok((Arc::new(jaxpr), consts))
}

/// Evaluate a jaxpr equation-by-equation through `bind`, under whatever
/// traces are currently active.
pub(crate) fn interpret_jaxpr(jaxpr: &Jaxpr, args: &[Array]) -> Result<Vec<Array>> {
    if args.len() != jaxpr.invars.len() {
        return Err(Error::Shape(format!(
            "program expects {} inputs, got {}",
            jaxpr.invars.len(),
            args.len()
        )));
    }
    let mut env: Vec<Option<Array>> = vec![None; jaxpr.vars.len()];
    for (i, a) in args.iter().enumerate() {
        env[i] = Some(a.clone());
    }
    for eqn in &jaxpr.eqns {
        let inputs: Vec<Array> = eqn
            .inputs
            .iter()
            .map(|&v| {
                env[v]
                    .clone()
                    .ok_or_else(|| Error::Unsupported(format!("unbound variable {}", v)))
            })
            .collect::<Result<_>>()?;
        let outs = bind(eqn.prim.clone(), &inputs)?;
        for (var, out) in eqn.outputs.iter().zip(outs) {
            env[*var] = Some(out);
        }
    }
    jaxpr
        .outvars
        .iter()
        .map(|&v| {
            env[v]
                .clone()
                .ok_or_else(|| Error::Unsupported(format!("unbound output variable {}", v)))
        })
        .collect()
}

/// A traced and cached function.
///
/// Returned by [`jit`]; traces on first call per input signature and
/// replays the recorded program afterwards.
pub struct JitFunction<F> {
    function: F,
    cache: Mutex<FxHashMap<Vec<AbstractValue>, CachedProgram>>,
    name: String,
}

#[derive(Clone)]
struct CachedProgram {
    jaxpr: Arc<Jaxpr>,
    consts: Vec<Array>,
}

impl<F> JitFunction<F>
where
    F: Fn(&[Array]) -> Result<Vec<Array>>,
{
    /// Create a JIT-compiled function.
    pub fn new(name: String, function: F) -> Self {
        Self {
            function,
            cache: Mutex::new(FxHashMap::default()),
            name,
        }
    }

    /// Execute, tracing and caching on the first call per signature.
    pub fn call(&self, args: &[Array]) -> Result<Vec<Array>> {
        let key: Vec<AbstractValue> = args.iter().map(|a| a.aval().clone()).collect();

        let program = {
            let cache = self.cache.lock().unwrap();
            cache.get(&key).cloned()
        };
        let program = match program {
            Some(p) => p,
            None => {
                let (jaxpr, consts) = trace_jaxpr(&self.function, &key)?;
                let plan = crate::trace::fusion::fusion_plan(&jaxpr);
                log::debug!(
                    "jit {}: {} equations fuse into {} kernels",
                    self.name,
                    jaxpr.eqns.len(),
                    plan.len()
                );
                let p = CachedProgram { jaxpr, consts };
                self.cache.lock().unwrap().insert(key, p.clone());
                p
            }
        };

        let num_consts = program.jaxpr.num_consts;
        let mut call_args = program.consts.clone();
        call_args.extend(args.iter().cloned());
        bind(
            Primitive::JitCall {
                jaxpr: program.jaxpr.clone(),
                num_consts,
            },
            &call_args,
        )
    }

    /// Number of distinct signatures traced so far.
    pub fn cache_size(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

/// JIT-compile a function.
///
/// Traces on first call with the given input shapes/dtypes, fuses the
/// recorded program into kernels, and caches the result for reuse.
///
/// # Examples
///
/// ```
/// use lazyjax::{jit, Array, Shape};
///
/// let f = jit("axpy", |inputs: &[Array]| {
///     Ok(vec![inputs[0].mul(&inputs[1])?.add(&inputs[0])?])
/// });
///
/// let a = Array::from_vec(vec![1.0, 2.0], Shape::new(vec![2])).unwrap();
/// let b = Array::from_vec(vec![3.0, 4.0], Shape::new(vec![2])).unwrap();
/// let out = f.call(&[a, b]).unwrap();
/// assert_eq!(out[0].data().unwrap(), vec![4.0, 10.0]);
/// ```
pub fn jit<F>(name: &str, function: F) -> JitFunction<F>
where
    F: Fn(&[Array]) -> Result<Vec<Array>>,
{
    JitFunction::new(name.to_string(), function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn arr(data: Vec<f32>, shape: Vec<usize>) -> Array {
        Array::from_vec(data, Shape::new(shape)).unwrap()
    }

    #[test]
    fn test_jit_basic() {
        let f = jit("add", |inputs: &[Array]| {
            Ok(vec![inputs[0].add(&inputs[1])?])
        });
        let a = arr(vec![1.0, 2.0, 3.0], vec![3]);
        let b = arr(vec![4.0, 5.0, 6.0], vec![3]);
        let out = f.call(&[a, b]).unwrap();
        assert_eq!(out[0].data().unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_jit_caches_per_signature() {
        let f = jit("mul", |inputs: &[Array]| {
            Ok(vec![inputs[0].mul(&inputs[1])?])
        });
        let a = arr(vec![2.0, 3.0], vec![2]);
        let b = arr(vec![4.0, 5.0], vec![2]);
        f.call(&[a.clone(), b.clone()]).unwrap();
        f.call(&[a, b]).unwrap();
        assert_eq!(f.cache_size(), 1);

        let c = arr(vec![1.0, 2.0, 3.0], vec![3]);
        let d = arr(vec![1.0, 1.0, 1.0], vec![3]);
        f.call(&[c, d]).unwrap();
        assert_eq!(f.cache_size(), 2);
    }

    #[test]
    fn test_jit_captures_constants() {
        let scale = arr(vec![10.0, 10.0], vec![2]);
        let f = jit("scale", move |inputs: &[Array]| {
            Ok(vec![inputs[0].mul(&scale)?])
        });
        let x = arr(vec![1.0, 2.0], vec![2]);
        let out = f.call(&[x]).unwrap();
        assert_eq!(out[0].data().unwrap(), vec![10.0, 20.0]);
    }

    #[test]
    fn test_jaxpr_records_equations() {
        let f = |inputs: &[Array]| -> Result<Vec<Array>> {
            let y = inputs[0].mul(&inputs[0])?;
            Ok(vec![y.add(&inputs[0])?])
        };
        let aval = AbstractValue::new(Shape::new(vec![4]), crate::DType::Float32);
        let (jaxpr, consts) = trace_jaxpr(&f, &[aval]).unwrap();
        assert!(consts.is_empty());
        assert_eq!(jaxpr.num_consts, 0);
        assert_eq!(jaxpr.eqns.len(), 2);
        assert_eq!(jaxpr.outvars.len(), 1);
    }

    #[test]
    fn test_jit_extensionally_equal() {
        let f = |x: &Array| -> Result<Array> {
            x.mul(x)?.add(&Array::full(1.0, x.shape().clone(), x.dtype()))
        };
        let jf = jit("f", move |inputs: &[Array]| Ok(vec![f(&inputs[0])?]));
        let x = arr(vec![1.0, 2.0, 3.0], vec![3]);
        let direct = f(&x).unwrap().data().unwrap();
        let jitted = jf.call(&[x]).unwrap()[0].data().unwrap();
        assert_eq!(direct, jitted);
    }
}
