use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError};
use crate::copy_tree::{self, Sandbox, StagingError};
use crate::engine;
use crate::mutants::{MutantResult, MutantStatus, Mutation};
use crate::pool::{InstanceConfig, PoolError, RunnerInstance, RunnerPool};
use crate::process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};
use crate::safety;
use crate::state::{RunReport, SkippedUnit};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A parsed source file and the mutations found in it.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    /// Path relative to the project root.
    pub rel_path: PathBuf,
    pub original: String,
    pub mutations: Vec<Mutation>,
}

pub fn apply_mutation(source: &str, mutation: &Mutation) -> String {
    let mut result = String::with_capacity(source.len());
    result.push_str(&source[..mutation.start_byte]);
    result.push_str(&mutation.replacement);
    result.push_str(&source[mutation.end_byte..]);
    result
}

pub fn generate_diff(original: &str, mutated: &str) -> String {
    use similar::TextDiff;
    let diff = TextDiff::from_lines(original, mutated);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                output.push_str(&format!("- {}", change));
            }
            similar::ChangeTag::Insert => {
                output.push_str(&format!("+ {}", change));
            }
            _ => {}
        }
    }
    output
}

/// Map the outcome of one test run to the status of the mutant under test.
pub fn classify(outcome: &Result<ProcessOutput, ProcessError>) -> MutantStatus {
    match outcome {
        Ok(_) => MutantStatus::Survived,
        Err(ProcessError::Failed { code: Some(_), .. }) => MutantStatus::Killed,
        Err(ProcessError::Timeout { .. }) => MutantStatus::TimedOut,
        Err(ProcessError::Failed { code: None, .. })
        | Err(ProcessError::Spawn { .. })
        | Err(ProcessError::Io { .. }) => MutantStatus::Errored,
    }
}

/// Cut `text` to at most `max` bytes on a char boundary.
pub fn truncate_output(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[output truncated]", &text[..end])
}

fn relative_to(path: &Path, root: &Path) -> Option<PathBuf> {
    if path.is_absolute() {
        path.strip_prefix(root).ok().map(Path::to_path_buf)
    } else {
        Some(path.to_path_buf())
    }
}

/// Read and scan every configured file. Files that cannot be read, have an
/// unsupported extension or do not parse are reported as skipped.
pub fn discover_units(config: &Config, project_root: &Path) -> (Vec<SourceUnit>, Vec<SkippedUnit>) {
    let mut units = Vec::new();
    let mut skipped = Vec::new();
    let exclusions = config.exclusions();
    debug!(excluded = ?exclusions.codes().collect::<Vec<_>>(), "operator exclusions");

    for path in &config.mutate {
        let file = path.display().to_string();
        let mut skip = |reason: String| {
            warn!(%file, %reason, "skipping source file");
            skipped.push(SkippedUnit { file: file.clone(), reason });
        };

        let Some(rel_path) = relative_to(path, project_root) else {
            skip("outside the project root".to_string());
            continue;
        };
        let Some(dialect) = crate::detect_language(&rel_path) else {
            skip("unsupported file type".to_string());
            continue;
        };
        let original = match std::fs::read_to_string(project_root.join(&rel_path)) {
            Ok(source) => source,
            Err(err) => {
                skip(format!("cannot read: {}", err));
                continue;
            }
        };
        match engine::find_mutations(&original, &exclusions, dialect) {
            Ok(mutations) => {
                debug!(file = %rel_path.display(), count = mutations.len(), "discovered mutations");
                units.push(SourceUnit { rel_path, original, mutations });
            }
            Err(err) => skip(err.to_string()),
        }
    }

    (units, skipped)
}

struct Job {
    index: usize,
    unit: usize,
    mutation: Mutation,
}

/// Settings shared by every pipeline of one run.
struct RunContext {
    runner: ProcessRunner,
    timeout: Duration,
    test_command: String,
    server_command: Option<String>,
    specs: String,
    pool: Option<Arc<RunnerPool>>,
    in_place: bool,
    max_output_bytes: usize,
}

/// One workspace plus, for server based frameworks, its runner instance.
/// Mutants in a pipeline are tested one after another.
struct Pipeline {
    index: usize,
    workspace: PathBuf,
    server: Option<RunnerInstance>,
    _sandbox: Option<Sandbox>,
}

impl Pipeline {
    async fn start_server(&mut self, ctx: &RunContext) -> Result<(), RunError> {
        if self.server.is_some() {
            return Ok(());
        }
        let (Some(pool), Some(command)) = (&ctx.pool, &ctx.server_command) else {
            return Ok(());
        };
        let launch = InstanceConfig {
            command: command.clone(),
            cwd: self.workspace.clone(),
        };
        let instance = pool.request_start(&launch).await?;
        debug!(pipeline = self.index, port = instance.port, "pipeline runner ready");
        self.server = Some(instance);
        Ok(())
    }

    fn stop_server(&mut self, ctx: &RunContext) {
        if let (Some(pool), Some(instance)) = (&ctx.pool, self.server.take()) {
            pool.stop(instance.id);
        }
    }

    fn test_spec(&self, ctx: &RunContext) -> Result<CommandSpec, RunError> {
        let mut vars = vec![("specs", ctx.specs.clone())];
        if let Some(server) = &self.server {
            vars.push(("port", server.port.to_string()));
        }
        CommandSpec::from_template(&ctx.test_command, &vars, &self.workspace)
            .ok_or(RunError::Config(ConfigError::MissingTestCommand))
    }

    async fn test_mutant(
        &self,
        ctx: &RunContext,
        unit: &SourceUnit,
        mutation: &Mutation,
    ) -> Result<MutantResult, RunError> {
        let spec = self.test_spec(ctx)?;
        let path = self.workspace.join(&unit.rel_path);
        let mutated = apply_mutation(&unit.original, mutation);
        let diff = generate_diff(&unit.original, &mutated);

        if ctx.in_place {
            safety::write_backup(&path, &unit.original).map_err(|source| RunError::Io {
                action: "back up",
                path: path.clone(),
                source,
            })?;
        }
        tokio::fs::write(&path, &mutated).await.map_err(|source| RunError::Io {
            action: "write mutant to",
            path: path.clone(),
            source,
        })?;

        let start = Instant::now();
        let outcome = ctx.runner.run(&spec, ctx.timeout).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let restored = if ctx.in_place {
            safety::restore_original(&path, &unit.original)
        } else {
            tokio::fs::write(&path, &unit.original).await
        };
        restored.map_err(|source| RunError::Io {
            action: "restore",
            path: path.clone(),
            source,
        })?;

        let status = classify(&outcome);
        let (stdout, stderr) = match &outcome {
            Ok(output) => (output.stdout.clone(), output.stderr.clone()),
            Err(err) => (err.stdout().to_string(), err.stderr()),
        };
        debug!(
            pipeline = self.index,
            id = %mutation.id,
            file = %unit.rel_path.display(),
            line = mutation.line,
            ?status,
            duration_ms,
            "mutant tested"
        );

        Ok(MutantResult {
            file: unit.rel_path.display().to_string(),
            mutation: mutation.clone(),
            status,
            stdout: truncate_output(&stdout, ctx.max_output_bytes),
            stderr: truncate_output(&stderr, ctx.max_output_bytes),
            duration_ms,
            diff,
        })
    }

    async fn run_jobs(
        mut self,
        ctx: Arc<RunContext>,
        units: Arc<Vec<SourceUnit>>,
        jobs: Vec<Job>,
    ) -> Result<Vec<(usize, MutantResult)>, RunError> {
        self.start_server(&ctx).await?;
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            let result = self.test_mutant(&ctx, &units[job.unit], &job.mutation).await;
            match result {
                Ok(result) => results.push((job.index, result)),
                Err(err) => {
                    self.stop_server(&ctx);
                    return Err(err);
                }
            }
        }
        // Free the slot for pipelines still waiting on the pool.
        self.stop_server(&ctx);
        Ok(results)
    }
}

/// Run the whole mutation test: baseline first, then every mutant of every
/// configured file, each in a workspace restored to the original afterwards.
pub async fn run(config: &Config, project_root: &Path) -> Result<RunReport, RunError> {
    config.validate()?;
    let start = Instant::now();

    let pool = config
        .server_command()?
        .map(|_| Arc::new(RunnerPool::new(config.pool_config())));
    let result = run_with_pool(config, project_root, pool.clone(), start).await;
    if let Some(pool) = &pool {
        pool.stop_all();
    }
    result
}

async fn run_with_pool(
    config: &Config,
    project_root: &Path,
    pool: Option<Arc<RunnerPool>>,
    start: Instant,
) -> Result<RunReport, RunError> {
    let in_place = config.mutate_production_code;
    if in_place {
        let files: Vec<PathBuf> = config.mutate.iter().map(|p| project_root.join(p)).collect();
        safety::recover_interrupted(&files).map_err(|source| RunError::Io {
            action: "recover",
            path: project_root.to_path_buf(),
            source,
        })?;
    }

    let (units, skipped) = discover_units(config, project_root);
    let units = Arc::new(units);

    let jobs: Vec<Job> = units
        .iter()
        .enumerate()
        .flat_map(|(unit, u)| u.mutations.iter().map(move |m| (unit, m.clone())))
        .enumerate()
        .map(|(index, (unit, mutation))| Job { index, unit, mutation })
        .collect();
    info!(files = units.len(), skipped = skipped.len(), mutants = jobs.len(), "mutation discovery done");

    let ctx = Arc::new(RunContext {
        runner: ProcessRunner::new(config.echo_output),
        timeout: config.timeout(),
        test_command: config.test_command()?,
        server_command: config.server_command()?,
        specs: config
            .specs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" "),
        pool,
        in_place,
        max_output_bytes: config.max_output_bytes,
    });

    let pipeline_count = config.effective_pipelines().min(jobs.len().max(1));
    let mut pipelines = Vec::with_capacity(pipeline_count);
    if in_place {
        pipelines.push(Pipeline {
            index: 0,
            workspace: project_root.to_path_buf(),
            server: None,
            _sandbox: None,
        });
    } else {
        let session_id = format!("{:08x}", fastrand::u32(..));
        for index in 0..pipeline_count {
            let sandbox = copy_tree::stage(project_root, &config.symlinks, &session_id)?;
            pipelines.push(Pipeline {
                index,
                workspace: sandbox.root.clone(),
                server: None,
                _sandbox: Some(sandbox),
            });
        }
    }

    // Baseline in the first workspace, before anything is mutated.
    let baseline = &mut pipelines[0];
    baseline.start_server(&ctx).await?;
    let spec = baseline.test_spec(&ctx)?;
    info!(command = %spec.display(), "running baseline");
    match ctx.runner.run(&spec, ctx.timeout).await {
        Ok(output) => info!(duration_ms = output.duration_ms, "baseline passed"),
        Err(err) => {
            warn!(error = %err, "baseline failed, no mutants will be tested");
            let mut output = format!("{}\n{}", err.stdout(), err.stderr());
            if output.trim().is_empty() {
                output = err.to_string();
            }
            let output = truncate_output(&output, config.max_output_bytes);
            return Ok(RunReport::baseline_failed(
                output,
                skipped,
                start.elapsed().as_millis() as u64,
            ));
        }
    }

    let mut batches: Vec<Vec<Job>> = (0..pipelines.len()).map(|_| Vec::new()).collect();
    let total = jobs.len();
    for (i, job) in jobs.into_iter().enumerate() {
        batches[i % pipelines.len()].push(job);
    }

    let mut set = JoinSet::new();
    for (pipeline, batch) in pipelines.into_iter().zip(batches) {
        set.spawn(pipeline.run_jobs(ctx.clone(), units.clone(), batch));
    }

    let mut indexed = Vec::with_capacity(total);
    while let Some(joined) = set.join_next().await {
        let batch = joined??;
        info!(done = indexed.len() + batch.len(), total, "pipeline finished");
        indexed.extend(batch);
    }
    indexed.sort_by_key(|(index, _)| *index);
    let results = indexed.into_iter().map(|(_, result)| result).collect();

    let report = RunReport::from_results(results, skipped, start.elapsed().as_millis() as u64);
    info!(
        total = report.total,
        killed = report.killed,
        survived = report.survived,
        timed_out = report.timed_out,
        errored = report.errored,
        score = report.score,
        "mutation run finished"
    );
    Ok(report)
}
