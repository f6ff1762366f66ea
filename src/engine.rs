use crate::action_catalog::ActionCatalog;
use crate::analysis::{Workload, WorkloadError};
use crate::config::{FailurePolicy, PipelineConfig};
use crate::facts::{CatalogFacts, FactsHandle};
use crate::generators::{
    ActionGenerator, CategoricalKnobGenerator, DropIndexGenerator, ExhaustiveIndexGenerator,
    GeneratorError, NumericalKnobGenerator, TypedIndexGenerator, WorkloadIndexGenerator,
};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Snafu)]
pub enum EngineError {
    #[snafu(display("Duplicate generator name: {}", name))]
    DuplicateName { name: String },

    #[snafu(display(
        "Generator {} refers to upstream {} which is not declared before it",
        name,
        upstream
    ))]
    UnknownUpstream { name: String, upstream: String },

    #[snafu(display("Generator {} has unknown type {}", name, generator))]
    UnknownGenerator { name: String, generator: String },

    #[snafu(display("Generator {} requires argument {}", name, argument))]
    MissingArgument {
        name: String,
        argument: &'static str,
    },

    #[snafu(display("Argument {} of generator {} must be a string", key, name))]
    InvalidReference { name: String, key: &'static str },

    #[snafu(display("Invalid arguments for generator {}: {}", name, source))]
    InvalidArgs {
        name: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("Failed to load workload {} for generator {}: {}", path, name, source))]
    LoadWorkload {
        name: String,
        path: String,
        source: WorkloadError,
    },

    #[snafu(display("Failed to build generator {}: {}", name, source))]
    Build {
        name: String,
        source: GeneratorError,
    },

    #[snafu(display("Generator {} failed: {}", name, source))]
    Generate {
        name: String,
        source: GeneratorError,
    },
}

type Result<T, E = EngineError> = std::result::Result<T, E>;

/// A non-fatal finding reported by a generator.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub generator: String,
    pub message: String,
}

/// A generator whose failure was skipped over.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratorFailure {
    pub generator: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub catalog: ActionCatalog,
    pub diagnostics: Vec<Diagnostic>,
    pub failures: Vec<GeneratorFailure>,
}

/// Workloads loaded for a pipeline, one per normalized log path.
#[derive(Debug, Default)]
pub struct WorkloadCache {
    loaded: HashMap<PathBuf, Arc<Workload>>,
}

impl WorkloadCache {
    pub fn get_or_load(
        &mut self,
        path: &Path,
        facts: &dyn CatalogFacts,
        coverage: f64,
    ) -> Result<Arc<Workload>, WorkloadError> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if let Some(workload) = self.loaded.get(&key) {
            debug!("Reusing workload {}", key.display());
            return Ok(Arc::clone(workload));
        }

        info!("Loading workload from {}", key.display());
        let workload = Arc::new(Workload::from_log(&key, facts.table_columns(), coverage)?);
        self.loaded.insert(key, Arc::clone(&workload));
        Ok(workload)
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }
}

/// Everything a constructor may draw on for one declaration.
pub struct BuildContext<'a> {
    pub name: &'a str,
    pub facts: &'a FactsHandle,
    pub upstream: Option<Arc<dyn ActionGenerator>>,
    pub workload: Option<Arc<Workload>>,
    args: Mapping,
}

impl BuildContext<'_> {
    /// Deserializes the remaining arguments, rejecting unknown keys.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T> {
        serde_yaml::from_value(Value::Mapping(self.args.clone()))
            .context(InvalidArgsSnafu { name: self.name })
    }

    pub fn require_upstream(&self) -> Result<Arc<dyn ActionGenerator>> {
        self.upstream.clone().context(MissingArgumentSnafu {
            name: self.name,
            argument: "upstream",
        })
    }

    pub fn require_workload(&self) -> Result<Arc<Workload>> {
        self.workload.clone().context(MissingArgumentSnafu {
            name: self.name,
            argument: "workload",
        })
    }
}

pub type Constructor = fn(&BuildContext<'_>) -> Result<Arc<dyn ActionGenerator>>;

/// Cross-declaration references a generator type resolves from its arguments.
///
/// Keys a type does not take are left in its arguments, where strict
/// deserialization rejects them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct References {
    pub upstream: bool,
    pub workload: bool,
}

impl References {
    pub const NONE: Self = Self {
        upstream: false,
        workload: false,
    };
    pub const UPSTREAM: Self = Self {
        upstream: true,
        workload: false,
    };
    pub const WORKLOAD: Self = Self {
        upstream: false,
        workload: true,
    };
}

#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub constructor: Constructor,
    pub references: References,
}

/// Generator types a pipeline may name.
pub struct Registry {
    constructors: HashMap<&'static str, Registration>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("DropIndexGenerator", build_drop, References::NONE);
        registry.register("ExhaustiveIndexGenerator", build_exhaustive, References::NONE);
        registry.register("WorkloadIndexGenerator", build_workload, References::WORKLOAD);
        registry.register("TypedIndexGenerator", build_typed, References::UPSTREAM);
        registry.register("NumericalKnobGenerator", build_numerical, References::NONE);
        registry.register("CategoricalKnobGenerator", build_categorical, References::NONE);
        registry
    }

    pub fn register(
        &mut self,
        name: &'static str,
        constructor: Constructor,
        references: References,
    ) {
        self.constructors.insert(
            name,
            Registration {
                constructor,
                references,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<Registration> {
        self.constructors.get(name).copied()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.constructors.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn build_drop(ctx: &BuildContext<'_>) -> Result<Arc<dyn ActionGenerator>> {
    Ok(Arc::new(DropIndexGenerator::new(
        Arc::clone(ctx.facts),
        ctx.args()?,
    )))
}

fn build_exhaustive(ctx: &BuildContext<'_>) -> Result<Arc<dyn ActionGenerator>> {
    Ok(Arc::new(ExhaustiveIndexGenerator::new(
        Arc::clone(ctx.facts),
        ctx.args()?,
    )))
}

fn build_workload(ctx: &BuildContext<'_>) -> Result<Arc<dyn ActionGenerator>> {
    let workload = ctx.require_workload()?;
    Ok(Arc::new(WorkloadIndexGenerator::new(&workload, ctx.args()?)))
}

fn build_typed(ctx: &BuildContext<'_>) -> Result<Arc<dyn ActionGenerator>> {
    let upstream = ctx.require_upstream()?;
    Ok(Arc::new(TypedIndexGenerator::new(upstream, ctx.args()?)))
}

fn build_numerical(ctx: &BuildContext<'_>) -> Result<Arc<dyn ActionGenerator>> {
    let generator = NumericalKnobGenerator::new(ctx.facts.as_ref(), ctx.args()?)
        .context(BuildSnafu { name: ctx.name })?;
    Ok(Arc::new(generator))
}

fn build_categorical(ctx: &BuildContext<'_>) -> Result<Arc<dyn ActionGenerator>> {
    let generator = CategoricalKnobGenerator::new(ctx.facts.as_ref(), ctx.args()?)
        .context(BuildSnafu { name: ctx.name })?;
    Ok(Arc::new(generator))
}

/// Builds the generators of a pipeline and runs them into one catalog.
pub struct RuleEngine {
    generators: IndexMap<String, Arc<dyn ActionGenerator>>,
    policy: FailurePolicy,
    workloads: WorkloadCache,
}

impl RuleEngine {
    pub fn new(config: &PipelineConfig, facts: FactsHandle) -> Result<Self> {
        Self::with_registry(config, facts, &Registry::builtin())
    }

    pub fn with_registry(
        config: &PipelineConfig,
        facts: FactsHandle,
        registry: &Registry,
    ) -> Result<Self> {
        let mut generators: IndexMap<String, Arc<dyn ActionGenerator>> = IndexMap::new();
        let mut workloads = WorkloadCache::default();

        for decl in &config.generators {
            let name = decl.name.as_str();
            ensure!(
                !generators.contains_key(name),
                DuplicateNameSnafu { name }
            );

            let registration = registry
                .get(&decl.generator)
                .context(UnknownGeneratorSnafu {
                    name,
                    generator: &decl.generator,
                })?;
            let mut args = decl.args.clone().unwrap_or_default();

            let upstream = match registration
                .references
                .upstream
                .then(|| take_reference(&mut args, "upstream", name))
                .transpose()?
                .flatten()
            {
                Some(upstream) => Some(
                    generators
                        .get(&upstream)
                        .cloned()
                        .context(UnknownUpstreamSnafu { name, upstream })?,
                ),
                None => None,
            };

            let workload = match registration
                .references
                .workload
                .then(|| take_reference(&mut args, "workload", name))
                .transpose()?
                .flatten()
            {
                Some(path) => {
                    let path = config.resolve_path(&path);
                    let workload = workloads
                        .get_or_load(&path, facts.as_ref(), config.workload_coverage)
                        .context(LoadWorkloadSnafu {
                            name,
                            path: path.display().to_string(),
                        })?;
                    Some(workload)
                }
                None => None,
            };

            let ctx = BuildContext {
                name,
                facts: &facts,
                upstream,
                workload,
                args,
            };
            let generator = (registration.constructor)(&ctx)?;
            info!("Instantiated generator {} ({})", name, decl.generator);
            generators.insert(decl.name.clone(), generator);
        }

        Ok(Self {
            generators,
            policy: config.on_generator_error,
            workloads,
        })
    }

    pub fn generator_names(&self) -> impl Iterator<Item = &str> {
        self.generators.keys().map(String::as_str)
    }

    pub fn workloads(&self) -> &WorkloadCache {
        &self.workloads
    }

    /// Drains every generator in declaration order into a fresh catalog.
    pub fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::default();

        for (name, generator) in &self.generators {
            for message in generator.diagnostics() {
                warn!("{name}: {message}");
                report.diagnostics.push(Diagnostic {
                    generator: name.clone(),
                    message,
                });
            }

            let mut produced = 0usize;
            let mut added = 0usize;
            let outcome = generator.actions().try_for_each(|item| {
                let action = item?;
                produced += 1;
                if report.catalog.insert(action) {
                    added += 1;
                }
                Ok::<_, GeneratorError>(())
            });

            match outcome {
                Ok(()) => info!("Generator {name} produced {produced} actions, {added} new"),
                Err(source) => match self.policy {
                    FailurePolicy::Abort => {
                        return Err(EngineError::Generate {
                            name: name.clone(),
                            source,
                        })
                    }
                    FailurePolicy::Skip => {
                        warn!("Skipping generator {name} after {produced} actions: {source}");
                        report.failures.push(GeneratorFailure {
                            generator: name.clone(),
                            error: source.to_string(),
                        });
                    }
                },
            }
        }

        info!(
            "Catalog holds {} actions for {} targets",
            report.catalog.action_count(),
            report.catalog.target_count()
        );
        Ok(report)
    }
}

/// Removes a generator or workload reference from the argument map.
fn take_reference(args: &mut Mapping, key: &'static str, name: &str) -> Result<Option<String>> {
    match args.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(_) => InvalidReferenceSnafu { name, key }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::fixtures;
    use crate::models::Action;
    use rstest::rstest;

    fn engine(yaml: &str) -> Result<RuleEngine> {
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        RuleEngine::new(&config, fixtures::shop().into_handle())
    }

    const PIPELINE: &str = r#"
generators:
  - name: drop
    generator: DropIndexGenerator
  - name: exhaustive
    generator: ExhaustiveIndexGenerator
    args:
      max_width: 2
  - name: hashed
    generator: TypedIndexGenerator
    args:
      upstream: exhaustive
      access_methods: [hash]
  - name: seqscan
    generator: CategoricalKnobGenerator
    args:
      parameter: enable_seqscan
      values: ['off', 'maybe', true]
  - name: work_mem
    generator: NumericalKnobGenerator
    args:
      knob_name: work_mem
      mode: PCT
      min_val: 1
      max_val: 2
      interval: 0.5
"#;

    #[test]
    fn runs_generators_in_declaration_order() {
        let engine = engine(PIPELINE).unwrap();
        assert_eq!(
            engine.generator_names().collect::<Vec<_>>(),
            vec!["drop", "exhaustive", "hashed", "seqscan", "work_mem"]
        );

        let report = engine.run().unwrap();
        let catalog = &report.catalog;
        // 2 drops, 7 + 18 exhaustive, the same again hashed, 2 + 3 settings.
        assert_eq!(catalog.action_count(), 2 + 25 + 25 + 2 + 3);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].generator, "seqscan");
        assert!(report.failures.is_empty());

        let first = catalog.actions().next().unwrap();
        assert!(matches!(first, Action::DropIndex { .. }));
    }

    #[test]
    fn repeated_runs_export_identically() {
        let engine = engine(PIPELINE).unwrap();
        let first = serde_json::to_string(&engine.run().unwrap().catalog.export()).unwrap();
        let second = serde_json::to_string(&engine.run().unwrap().catalog.export()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn overlapping_generators_are_deduplicated() {
        let report = engine(
            r#"
generators:
  - { name: a, generator: ExhaustiveIndexGenerator, args: { max_width: 1 } }
  - { name: b, generator: ExhaustiveIndexGenerator, args: { max_width: 2 } }
"#,
        )
        .unwrap()
        .run()
        .unwrap();
        assert_eq!(report.catalog.action_count(), 7 + 18);
        assert_eq!(report.catalog.target_count(), 7 + 18);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = engine(
            r#"
generators:
  - { name: a, generator: DropIndexGenerator }
  - { name: a, generator: ExhaustiveIndexGenerator }
"#,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::DuplicateName { .. }));
    }

    #[test]
    fn upstream_must_be_declared_first() {
        let err = engine(
            r#"
generators:
  - { name: typed, generator: TypedIndexGenerator, args: { upstream: all, access_methods: [hash] } }
  - { name: all, generator: ExhaustiveIndexGenerator }
"#,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::UnknownUpstream { .. }));
    }

    #[test]
    fn typed_generator_needs_an_upstream() {
        let err = engine(
            r#"
generators:
  - { name: typed, generator: TypedIndexGenerator, args: { access_methods: [hash] } }
"#,
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            EngineError::MissingArgument {
                argument: "upstream",
                ..
            }
        ));
    }

    #[test]
    fn unknown_generator_type_is_rejected() {
        let err = engine("generators: [{ name: x, generator: MagicIndexGenerator }]")
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::UnknownGenerator { .. }));
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        let err = engine(
            "generators: [{ name: x, generator: ExhaustiveIndexGenerator, args: { width: 2 } }]",
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::InvalidArgs { .. }));
    }

    #[rstest]
    #[case("{ upstream: drop }")]
    #[case("{ workload: missing.log }")]
    fn references_are_rejected_where_not_taken(#[case] args: &str) {
        let yaml = format!(
            "generators:\n  - {{ name: drop, generator: DropIndexGenerator }}\n  - {{ name: x, generator: ExhaustiveIndexGenerator, args: {args} }}\n"
        );
        let err = engine(&yaml).err().unwrap();
        assert!(matches!(err, EngineError::InvalidArgs { ref name, .. } if name == "x"));
    }

    #[test]
    fn unknown_parameter_fails_construction() {
        let err = engine(
            "generators: [{ name: x, generator: CategoricalKnobGenerator, args: { parameter: nope, values: [on] } }]",
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::Build { .. }));
    }

    const FAILING: &str = r#"
generators:
  - name: empty
    generator: NumericalKnobGenerator
    args: { parameter: work_mem, mode: ABSOLUTE, min_val: 128, max_val: 32, interval: 16 }
  - name: ranged
    generator: NumericalKnobGenerator
    args: { parameter: work_mem, mode: ABSOLUTE, min_val: 32, max_val: 96, interval: 32 }
  - name: drop
    generator: DropIndexGenerator
"#;

    #[test]
    fn generator_errors_abort_by_default() {
        let err = engine(FAILING).unwrap().run().unwrap_err();
        assert!(matches!(err, EngineError::Generate { ref name, .. } if name == "ranged"));
    }

    #[test]
    fn skip_policy_keeps_collected_actions() {
        let yaml = format!("on_generator_error: skip\n{FAILING}");
        let report = engine(&yaml).unwrap().run().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].generator, "ranged");
        // Nothing from the empty sweep, nothing from the failed one, two drops.
        assert_eq!(report.catalog.action_count(), 2);
    }

    #[test]
    fn workloads_are_loaded_once_per_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("postgres.log"),
            "LOG:  statement: SELECT * FROM orders WHERE status = 'open' AND customer_id = 4\n",
        )
        .unwrap();
        let pipeline = dir.path().join("pipeline.yaml");
        std::fs::write(
            &pipeline,
            r#"
generators:
  - { name: single, generator: WorkloadIndexGenerator, args: { workload: postgres.log } }
  - { name: pairs, generator: WorkloadIndexGenerator, args: { workload: ./postgres.log, max_width: 2 } }
"#,
        )
        .unwrap();

        let config = PipelineConfig::from_config_file(&pipeline).unwrap();
        let engine = RuleEngine::new(&config, fixtures::shop().into_handle()).unwrap();
        assert_eq!(engine.workloads().len(), 1);

        let report = engine.run().unwrap();
        assert_eq!(report.catalog.action_count(), 2 + 2);
    }

    #[test]
    fn workload_generator_needs_a_workload() {
        let err = engine("generators: [{ name: w, generator: WorkloadIndexGenerator }]")
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EngineError::MissingArgument {
                argument: "workload",
                ..
            }
        ));
    }

    #[test]
    fn registry_lists_builtin_generators() {
        let names = Registry::builtin().names();
        assert_eq!(names.len(), 6);
        assert_eq!(names[0], "CategoricalKnobGenerator");
    }
}
