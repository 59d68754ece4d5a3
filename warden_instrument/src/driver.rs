//! The rewrite driver.
//!
//! Works on a clone of the input unit so failure never leaves a
//! half-rewritten result: either every method comes back rewritten and
//! (optionally) verified, or the caller keeps the original.

use crate::classify::{classify, ClassifyContext, InjectionSite};
use crate::error::InstrumentError;
use crate::repository::UnitRepository;
use crate::synthesize::synthesize;
use std::sync::Arc;
use warden_bytecode::{compute_max_stack, verify_method, CompiledUnit, Handle};

/// Knobs for a rewrite run.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstrumentOptions {
    /// Run the structural verifier on every changed method.
    pub verify: bool,
}

/// Per-method report entry.
#[derive(Debug, Clone)]
pub struct MethodOutcome {
    /// Method name.
    pub name: Arc<str>,
    /// Number of checks injected.
    pub sites: usize,
    /// True when the method body was modified.
    pub changed: bool,
}

/// A successfully rewritten unit plus its report.
#[derive(Debug)]
pub struct RewrittenUnit {
    /// The rewritten unit. Identical to the input when nothing changed.
    pub unit: CompiledUnit,
    /// One entry per declared method, in declaration order.
    pub methods: Vec<MethodOutcome>,
}

impl RewrittenUnit {
    /// True when any method changed.
    pub fn changed(&self) -> bool {
        self.methods.iter().any(|m| m.changed)
    }
}

/// Rewrites units against a repository of loaded metadata.
pub struct Instrumenter<'a> {
    repo: &'a UnitRepository,
    options: InstrumentOptions,
}

impl<'a> Instrumenter<'a> {
    /// Create a driver over `repo`.
    pub fn new(repo: &'a UnitRepository, options: InstrumentOptions) -> Self {
        Instrumenter { repo, options }
    }

    /// Rewrite every method of `unit`, or fail without partial output.
    pub fn instrument_unit(&self, unit: &CompiledUnit) -> Result<RewrittenUnit, InstrumentError> {
        let mut work = unit.clone();

        // Interfaces carry no instrumentable code.
        if work.is_interface() {
            let methods = work
                .methods
                .iter()
                .map(|m| MethodOutcome {
                    name: m.name.clone(),
                    sites: 0,
                    changed: false,
                })
                .collect();
            return Ok(RewrittenUnit {
                unit: work,
                methods,
            });
        }

        let unit_name = work.name.clone();
        let mut outcomes = Vec::with_capacity(work.methods.len());

        for i in 0..work.methods.len() {
            let name = work.methods[i].name.clone();
            let in_ctor = work.methods[i].is_ctor();
            let mut code = match work.methods[i].code.take() {
                Some(code) => code,
                None => {
                    outcomes.push(MethodOutcome {
                        name,
                        sites: 0,
                        changed: false,
                    });
                    continue;
                }
            };

            // Pass 1: classify, with the original stream intact.
            let mut sites: Vec<InjectionSite> = Vec::new();
            {
                let ctx = ClassifyContext::new(&unit_name, &work.fields, self.repo);
                let handles: Vec<Handle> = code.iter().map(|(h, _)| h).collect();
                for h in handles {
                    if let Some(site) = classify(&ctx, in_ctor, &mut work.pool, &code, h)? {
                        sites.push(site);
                    }
                }
            }

            // Pass 2: expand. Handles stay valid across insertion, so
            // earlier expansions never invalidate later sites.
            for site in &sites {
                synthesize(site, &mut work.pool, &mut code)?;
            }

            let changed = !sites.is_empty();
            if changed {
                let computed =
                    compute_max_stack(&code, &work.pool).map_err(|source| {
                        InstrumentError::Verify {
                            method: name.clone(),
                            source,
                        }
                    })?;
                work.methods[i].max_stack = computed;
            }
            work.methods[i].code = Some(code);

            if changed && self.options.verify {
                verify_method(&work.methods[i], &work.pool).map_err(|source| {
                    InstrumentError::Verify {
                        method: name.clone(),
                        source,
                    }
                })?;
            }

            outcomes.push(MethodOutcome {
                name,
                sites: sites.len(),
                changed,
            });
        }

        Ok(RewrittenUnit {
            unit: work,
            methods: outcomes,
        })
    }
}
