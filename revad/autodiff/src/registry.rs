//! The catalog of dependency nodes.
//!
//! A node is the derivative rule of one differentiable primitive. Its backprop
//! method is written in the `ir` language: the catalog function
//! `%<node>.d<i>(upstream, inputs.., primal)` returns the contribution of
//! input `i`, given the upstream derivative of the node's result. These
//! templates are inlined into pullbacks, so they must be straight-line code.

use ahash::{AHashMap, RandomState};
use indexmap::IndexMap;
use ir::{Expr, Function, FunctionBuilder, Opcode, Stmt, Ty, Var};
use smol_str::SmolStr;
use stdx::pretty::List;
use stdx::{impl_idx_from, to_camel_case};
use typed_index_collections::TiVec;

use crate::Error;

#[cfg(test)]
mod tests;

const BUILTIN_CATALOG: &str = include_str!("nodes.rir");

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(u32);
impl_idx_from!(NodeId(u32));

/// The backprop rule of a single node input.
#[derive(Clone, Debug)]
pub struct Template {
    func: Function,
    upstream: Var,
    inputs: Vec<Var>,
    primal: Var,
    result: Var,
    reads_input: Vec<bool>,
    reads_primal: bool,
}

impl Template {
    fn new(func: Function) -> Result<Template, String> {
        if func.returns != [Ty::Real] {
            return Err("derivative rules must return a single real".to_owned());
        }
        if func.params.len() < 3 {
            return Err("expected parameters (upstream, inputs.., primal)".to_owned());
        }
        if let Some(param) = func.params.iter().find(|param| func.var_ty(**param) != Ty::Real) {
            return Err(format!("parameter '{}' is not a real", func.var_name(*param)));
        }
        if let Err(errors) = func.validate() {
            return Err(List::new(errors).to_string());
        }

        let (result, body) = match func.body.stmts.split_last() {
            Some((Stmt::Return(vals), body)) if vals.len() == 1 => (vals[0], body),
            _ => return Err("derivative rules must end with a return".to_owned()),
        };

        let mut reads = TiVec::<Var, bool>::from(vec![false; func.vars.len()]);
        reads[result] = true;
        for stmt in body {
            match stmt {
                Stmt::Def {
                    decl: true,
                    expr:
                        expr @ (Expr::Const(_) | Expr::Copy(_) | Expr::Op { .. } | Expr::Call { .. }),
                    ..
                } => {
                    for arg in expr.uses() {
                        reads[*arg] = true;
                    }
                }
                _ => return Err("derivative rules must be straight-line code".to_owned()),
            }
        }

        let upstream = func.params[0];
        let primal = func.params[func.params.len() - 1];
        let inputs = func.params[1..func.params.len() - 1].to_vec();
        Ok(Template {
            upstream,
            primal,
            result,
            reads_input: inputs.iter().map(|input| reads[*input]).collect(),
            reads_primal: reads[primal],
            inputs,
            func,
        })
    }

    pub fn reads_input(&self, input: usize) -> bool {
        self.reads_input[input]
    }

    pub fn reads_primal(&self) -> bool {
        self.reads_primal
    }

    /// Inlines the template into `builder` and returns the variable holding the contribution.
    pub fn instantiate(
        &self,
        builder: &mut FunctionBuilder,
        upstream: Var,
        inputs: &[Var],
        primal: Var,
    ) -> Var {
        let mut map: TiVec<Var, Var> = self.func.vars.keys().collect();
        map[self.upstream] = upstream;
        map[self.primal] = primal;
        for (param, arg) in self.inputs.iter().zip(inputs) {
            map[*param] = *arg;
        }

        for stmt in &self.func.body.stmts {
            if let Stmt::Def { dst, expr, .. } = stmt {
                let expr = expr.map_vars(|var| map[var]);
                let data = &self.func.vars[*dst];
                map[*dst] = builder.def(&data.name, data.ty, expr);
            }
        }
        map[self.result]
    }
}

/// A differentiable primitive operation.
#[derive(Clone, Debug)]
pub struct NodeDef {
    /// Name used by call-site links, e.g. `SoftPlusNode`.
    pub name: SmolStr,
    /// Path of the operation, e.g. `nn.soft_plus`.
    pub qualified: SmolStr,
    pub arity: usize,
    /// One rule per input.
    pub backprop: Vec<Template>,
    /// Folds a contribution into an accumulator.
    pub pushback: Opcode,
}

impl NodeDef {
    /// Whether the backprop rule of any `active` input reads the node's primal result.
    pub fn primal_referenced(&self, active: &[bool]) -> bool {
        self.backprop.iter().zip(active).any(|(rule, active)| *active && rule.reads_primal)
    }

    /// For every input whether the backprop rule of any `active` input reads it.
    pub fn inputs_referenced(&self, active: &[bool]) -> Vec<bool> {
        (0..self.arity)
            .map(|input| {
                self.backprop
                    .iter()
                    .zip(active)
                    .any(|(rule, active)| *active && rule.reads_input[input])
            })
            .collect()
    }
}

pub fn node_name(qualified: &str) -> SmolStr {
    let last = qualified.rsplit('.').next().unwrap_or(qualified);
    format!("{}Node", to_camel_case(last)).into()
}

fn op_path(opcode: Opcode) -> String {
    format!("math.{}", opcode.name())
}

/// All dependency nodes known to a module. Never mutated while pullbacks are generated.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    nodes: TiVec<NodeId, NodeDef>,
    qualified: IndexMap<SmolStr, NodeId, RandomState>,
    names: AHashMap<SmolStr, Vec<NodeId>>,
}

impl Registry {
    /// A registry containing the rules of all differentiable opcodes.
    pub fn new() -> Result<Registry, Error> {
        let mut registry = Registry::default();
        registry.add_catalog(BUILTIN_CATALOG)?;
        Ok(registry)
    }

    /// Registers all rules defined in `src`.
    pub fn add_catalog(&mut self, src: &str) -> Result<(), Error> {
        let funcs = ir_reader::parse_functions(src)
            .map_err(|err| Error::Catalog { name: "<catalog>".into(), msg: err.to_string() })?;

        let mut grouped: IndexMap<SmolStr, Vec<(usize, Function)>, RandomState> =
            IndexMap::default();
        for func in funcs {
            let split = func.name.rsplit_once('.').and_then(|(qualified, rule)| {
                let input = rule.strip_prefix('d')?.parse().ok()?;
                Some((SmolStr::from(qualified), input))
            });
            let Some((qualified, input)) = split else {
                return Err(Error::Catalog {
                    name: func.name.clone(),
                    msg: "expected a name of the form <node>.d<input>".to_owned(),
                });
            };
            grouped.entry(qualified).or_default().push((input, func));
        }

        for (qualified, mut rules) in grouped {
            let catalog_err = |msg: String| Error::Catalog { name: qualified.clone(), msg };
            if self.qualified.contains_key(&qualified) {
                return Err(catalog_err("node is defined twice".to_owned()));
            }
            rules.sort_by_key(|(input, _)| *input);
            let arity = rules[0].1.params.len().saturating_sub(2);
            let mut backprop = Vec::with_capacity(arity);
            for (i, (input, func)) in rules.into_iter().enumerate() {
                if input != i {
                    return Err(catalog_err(format!("missing or duplicate rule for input {i}")));
                }
                if func.params.len() != arity + 2 {
                    return Err(catalog_err("rules disagree about the number of inputs".to_owned()));
                }
                backprop.push(Template::new(func).map_err(catalog_err)?);
            }
            if backprop.len() != arity {
                return Err(catalog_err(format!("missing rule for input {}", backprop.len())));
            }

            let name = node_name(&qualified);
            log::trace!("registered {} ({} inputs) as {}", qualified, arity, name);
            let id = self.nodes.push_and_get_key(NodeDef {
                name: name.clone(),
                qualified: qualified.clone(),
                arity,
                backprop,
                pushback: Opcode::Fadd,
            });
            self.qualified.insert(qualified, id);
            self.names.entry(name).or_default().push(id);
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> &NodeDef {
        &self.nodes[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeDef> {
        self.qualified.values().map(|id| &self.nodes[*id])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn by_name(&self, callee: &str, name: &str) -> Result<Option<NodeId>, Error> {
        match self.names.get(name).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([id]) => Ok(Some(*id)),
            Some(ids) => {
                let candidates: Vec<_> = ids.iter().map(|id| &self.nodes[*id].qualified).collect();
                Err(Error::AmbiguousNode {
                    callee: callee.into(),
                    candidates: List::new(candidates).quoted().with_final_separator(" and ").to_string(),
                })
            }
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum Target {
    Op(Opcode),
    Call { callee: SmolStr, link: Option<SmolStr> },
}

/// Resolves call sites to nodes. Results are memoized for the lifetime of the resolver.
pub struct Resolver<'a> {
    pub registry: &'a Registry,
    cache: AHashMap<Target, Option<NodeId>>,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a Registry) -> Resolver<'a> {
        Resolver { registry, cache: AHashMap::default() }
    }

    /// The node that differentiates `expr`, `None` if `expr` is inert.
    ///
    /// An explicit `[node Name]` link takes precedence, then an exact match of
    /// the callee path, then a unique match of the node name derived from the
    /// callee.
    pub fn resolve(&mut self, expr: &Expr) -> Result<Option<NodeId>, Error> {
        let target = match expr {
            Expr::Op { opcode, .. } => Target::Op(*opcode),
            Expr::Call { callee, node, .. } => {
                Target::Call { callee: callee.clone(), link: node.clone() }
            }
            _ => return Ok(None),
        };
        if let Some(res) = self.cache.get(&target) {
            return Ok(*res);
        }

        let registry = self.registry;
        let res = match &target {
            Target::Op(opcode) => registry.qualified.get(op_path(*opcode).as_str()).copied(),
            Target::Call { callee, link: Some(link) } => {
                let id = registry.by_name(callee, link)?;
                Some(id.ok_or_else(|| Error::UnknownNode { name: link.clone() })?)
            }
            Target::Call { callee, link: None } => match registry.qualified.get(callee) {
                Some(id) => Some(*id),
                None => registry.by_name(callee, &node_name(callee))?,
            },
        };
        if let Some(id) = res {
            log::trace!("resolved {:?} to {}", target, registry.nodes[id].name);
        }
        self.cache.insert(target, res);
        Ok(res)
    }
}
