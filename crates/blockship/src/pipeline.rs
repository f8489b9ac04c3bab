//! The publish pipeline.
//!
//! ```text
//! VerifyFiles -> VerifyWorkingTree -> ResolveDependencies -> Build -> Test
//!   -> Checksum -> VersionStrategy -> Reserve -> {Push -> Commit | Abort} -> Tag
//! ```
//!
//! Nothing outside the working copy is touched before Reserve, so earlier
//! failures need no cleanup. From Reserve on, any failure releases the
//! reservation before the original error is returned. Tagging runs only
//! after a successful commit on the main branch and never fails the push.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::SecondsFormat;
use blockship_events::{ALL_ASSETS, EventLog};
use blockship_process::run_script;
use blockship_registry::{RegistryApi, ReserveRequest};
use blockship_semver::{
    IncrementType, calculate_increment_type, calculate_next_version, compare_definitions,
    increment_version_by, is_increment_greater_than,
};
use blockship_types::{
    AssetDefinition, AssetReference, AssetVersion, EventType, PublishEvent, Readme, Repository,
    Reservation,
};

use crate::definition::load_definitions;
use crate::dependencies::{find_local_source, local_references, replace_references, same_file_order};
use crate::error::PublishError;
use crate::handlers::{ArtifactHandler, HandlerRegistry};
use crate::reporter::{Reporter, progress};
use crate::vcs::VcsHandler;

/// Project-local script replacing the handler's build.
pub const BUILD_SCRIPT: &str = "scripts/build.sh";
/// Project-local script replacing the handler's tests.
pub const TEST_SCRIPT: &str = "scripts/test.sh";
pub const README_FILE: &str = "README.md";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// Skip the clean / up-to-date working tree checks.
    pub ignore_working_directory: bool,
    pub skip_tests: bool,
    /// Reserve, report and release without pushing or committing.
    pub dry_run: bool,
    /// Derive the version from what is registered instead of trusting the file.
    pub auto_versioning: bool,
    /// With auto-versioning off, require the declared bump to cover the
    /// structural change.
    pub check_version: bool,
    /// JSONL file the run's events are appended to.
    pub event_log: Option<PathBuf>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            ignore_working_directory: false,
            skip_tests: false,
            dry_run: false,
            auto_versioning: true,
            check_version: true,
            event_log: None,
        }
    }
}

/// State shared by one top-level push and every dependency it publishes.
#[derive(Debug, Default)]
pub struct PublishContext {
    resolved: BTreeMap<String, String>,
    in_flight: Vec<PathBuf>,
    events: EventLog,
}

impl PublishContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version published (or found published) for `full_name` in this run.
    pub fn resolved_version(&self, full_name: &str) -> Option<&str> {
        self.resolved
            .get(&full_name.to_lowercase())
            .map(String::as_str)
    }

    pub fn record_resolution(&mut self, full_name: &str, version: &str) {
        self.resolved
            .insert(full_name.to_lowercase(), version.to_string());
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    fn enter(&mut self, file: &Path) -> Result<()> {
        let key = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
        if let Some(start) = self.in_flight.iter().position(|f| *f == key) {
            let chain = self.in_flight[start..]
                .iter()
                .chain(std::iter::once(&key))
                .map(|f| f.display().to_string())
                .collect();
            return Err(PublishError::DependencyCycle(chain).into());
        }
        self.in_flight.push(key);
        Ok(())
    }

    fn leave(&mut self) {
        self.in_flight.pop();
    }
}

/// What a push produced.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub file: PathBuf,
    /// Final reference of every asset in the file, including ones that were
    /// already published.
    pub references: Vec<AssetReference>,
    /// Assets committed by this push.
    pub committed: Vec<AssetReference>,
    pub tags: Vec<String>,
    /// Why tagging or pushing the source failed after a successful commit.
    pub tag_error: Option<String>,
    pub dry_run: bool,
    pub events: Vec<PublishEvent>,
}

impl PublishOutcome {
    pub fn version_of(&self, full_name: &str) -> Option<&str> {
        self.references
            .iter()
            .find(|r| r.full_name().eq_ignore_ascii_case(full_name))
            .map(|r| r.version.as_str())
    }
}

/// How a reservation was settled.
enum Settlement {
    Committed(Vec<AssetReference>),
    Released(String),
}

/// One asset while it moves through the pipeline. `source` keeps same-file
/// `local` references intact so they can be re-applied whenever versions
/// change.
struct Asset {
    source: AssetDefinition,
    full_name: String,
    version: String,
    already_published: bool,
}

pub struct PublishPipeline<'a> {
    registry: &'a dyn RegistryApi,
    handlers: &'a HandlerRegistry,
    options: PublishOptions,
}

impl<'a> PublishPipeline<'a> {
    pub fn new(
        registry: &'a dyn RegistryApi,
        handlers: &'a HandlerRegistry,
        options: PublishOptions,
    ) -> Self {
        Self {
            registry,
            handlers,
            options,
        }
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    /// Publishes every asset in `file`, and any local dependencies first.
    pub fn push(&self, file: &Path, reporter: &mut dyn Reporter) -> Result<PublishOutcome> {
        let mut ctx = PublishContext::new();
        let result = self.push_with_context(file, &mut ctx, reporter);

        if let Some(path) = &self.options.event_log
            && let Err(e) = ctx.events.append_to_file(path)
        {
            reporter.warn(&format!("failed to write event log: {e:#}"));
        }
        result
    }

    /// Like [`push`](Self::push), sharing resolved versions and cycle
    /// detection with the caller.
    pub fn push_with_context(
        &self,
        file: &Path,
        ctx: &mut PublishContext,
        reporter: &mut dyn Reporter,
    ) -> Result<PublishOutcome> {
        ctx.enter(file)?;
        let first_event = ctx.events.len();
        ctx.events.emit(
            EventType::RunStarted {
                file: file.display().to_string(),
                dry_run: self.options.dry_run,
            },
            ALL_ASSETS,
        );

        let result = self.run(file, ctx, reporter);

        ctx.events
            .emit(EventType::RunFinished { success: result.is_ok() }, ALL_ASSETS);
        ctx.leave();

        let mut outcome = result?;
        outcome.events = ctx.events.all_events()[first_event..].to_vec();
        Ok(outcome)
    }

    fn run(
        &self,
        file: &Path,
        ctx: &mut PublishContext,
        reporter: &mut dyn Reporter,
    ) -> Result<PublishOutcome> {
        let directory = match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let definitions = step(ctx, reporter, "Verifying files exist", |_, r| {
            verify_files(file, r)
        })?;

        let vcs = self.handlers.vcs_handler_for_directory(&directory);
        match &vcs {
            Some(handler) => {
                reporter.info(&format!("Identified version control system: {}", handler.name()))
            }
            None => reporter.warn("No version control system found in folder."),
        }

        if let Some(handler) = vcs.as_deref()
            && !self.options.ignore_working_directory
        {
            step(ctx, reporter, "Verifying working directory", |_, r| {
                verify_working_tree(handler, r)
            })?;
        }

        let handler = self.handlers.artifact_handler_for_directory(&directory)?;
        reporter.info(&format!("Identified artifact type: {}", handler.name()));
        if let Err(e) = handler.verify() {
            reporter.warn(&format!("{e:#}"));
        }

        let mut assets = step(ctx, reporter, "Resolving local dependencies", |ctx, r| {
            self.resolve_dependencies(definitions, &directory, ctx, r)
        })?;

        step(ctx, reporter, "Building", |_, r| {
            run_build(handler.as_ref(), &directory, r)
        })?;

        if self.options.skip_tests {
            reporter.info("Skipping tests...");
        } else {
            step(ctx, reporter, "Running tests", |_, r| {
                run_tests(handler.as_ref(), &directory, r)
            })?;
        }

        let checksum = step(ctx, reporter, "Calculating checksum", |_, r| {
            handler.calculate_checksum(r)
        })?;

        let order = same_file_order(&assets.iter().map(|a| a.source.clone()).collect::<Vec<_>>())?;
        if self.options.auto_versioning {
            step(ctx, reporter, "Checking existing versions", |ctx, r| {
                self.auto_version(&mut assets, &order, &checksum, ctx, r)
            })?;
        } else if self.options.check_version {
            step(ctx, reporter, "Checking semantic version", |_, _| {
                self.check_versions(&assets, &order)
            })?;
        }

        let repository = match vcs.as_deref() {
            Some(handler) => Some(handler.snapshot().context("failed to read version control state")?),
            None => None,
        };

        let materialized = materialize(&assets);
        let request = ReserveRequest {
            assets: order.iter().map(|&i| materialized[i].clone()).collect(),
            branch: repository.as_ref().and_then(|r| r.branch.clone()),
            commit: repository.as_ref().and_then(|r| r.commit.clone()),
            checksum: Some(checksum.clone()),
            main_branch: repository.as_ref().is_some_and(|r| r.main),
        };
        let versions_label = request
            .assets
            .iter()
            .filter_map(|a| a.reference().ok())
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let reservation = step(
            ctx,
            reporter,
            &format!("Reserving version: {versions_label}"),
            |_, _| {
                self.registry
                    .reserve(&request)?
                    .ok_or_else(|| PublishError::ReservationMissing.into())
            },
        )?;
        ctx.events.emit(
            EventType::ReservationCreated {
                id: reservation.id.clone(),
                versions: reservation.versions.iter().map(|v| v.version.clone()).collect(),
            },
            ALL_ASSETS,
        );
        if let Some(expires) = reservation.expires_at() {
            reporter.debug(&format!(
                "reservation {} expires at {}",
                reservation.id,
                expires.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }

        let settled = self.settle(
            &reservation,
            &mut assets,
            &order,
            &checksum,
            repository.as_ref(),
            handler.as_ref(),
            &directory,
            ctx,
            reporter,
        );
        let settlement = match settled {
            Ok(settlement) => settlement,
            Err(e) => {
                self.abort(&reservation, &format!("{e:#}"), ctx, reporter);
                return Err(e);
            }
        };

        let (committed, tags, tag_error) = match settlement {
            Settlement::Committed(committed) => {
                let (tags, tag_error) = match (vcs.as_deref(), &repository) {
                    (Some(handler), Some(repository)) if repository.main => {
                        self.tag_and_push(handler, &committed, assets.len(), ctx, reporter)
                    }
                    _ => (Vec::new(), None),
                };
                (committed, tags, tag_error)
            }
            Settlement::Released(reason) => {
                self.abort(&reservation, &reason, ctx, reporter);
                (Vec::new(), Vec::new(), None)
            }
        };

        let references: Vec<AssetReference> = materialize(&assets)
            .iter()
            .map(AssetDefinition::reference)
            .collect::<Result<_>>()?;
        if !self.options.dry_run {
            for reference in &references {
                ctx.record_resolution(&reference.full_name(), &reference.version);
            }
        }

        Ok(PublishOutcome {
            file: file.to_path_buf(),
            references,
            committed,
            tags,
            tag_error,
            dry_run: self.options.dry_run,
            events: Vec::new(),
        })
    }

    /// Publishes every external `local` dependency and substitutes the
    /// resulting versions. References to assets of the same file stay
    /// `local` until versions are known.
    fn resolve_dependencies(
        &self,
        definitions: Vec<AssetDefinition>,
        directory: &Path,
        ctx: &mut PublishContext,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<Asset>> {
        let same_file: Vec<String> = definitions
            .iter()
            .filter_map(|d| d.name().map(str::to_lowercase))
            .collect();

        let mut versions = BTreeMap::new();
        for reference in definitions.iter().flat_map(local_references) {
            let full_name = reference.full_name();
            let key = full_name.to_lowercase();
            if same_file.contains(&key) || versions.contains_key(&key) {
                continue;
            }
            if let Some(version) = ctx.resolved_version(&full_name) {
                reporter.info(&format!("Using {full_name}:{version} published earlier in this run"));
                versions.insert(key, version.to_string());
                continue;
            }

            let source = find_local_source(&full_name, directory, self.handlers.config())
                .ok_or_else(|| PublishError::DependencyNotFound(reference.to_string()))?;
            reporter.info(&format!(
                "Publishing local dependency {full_name} from {}",
                source.display()
            ));
            let version = self.publish_dependency(&full_name, &source, ctx, reporter)?;
            ctx.events.emit(
                EventType::DependencyResolved {
                    reference: reference.to_string(),
                    resolved: format!("{full_name}:{version}"),
                },
                full_name.clone(),
            );
            ctx.record_resolution(&full_name, &version);
            versions.insert(key, version);
        }

        definitions
            .into_iter()
            .map(|mut source| {
                replace_references(&mut source, &versions);
                let full_name = source
                    .name()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("asset definition is missing metadata.name"))?;
                let version = source
                    .version()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("asset definition {full_name} is missing metadata.version"))?;
                Ok(Asset {
                    source,
                    full_name,
                    version,
                    already_published: false,
                })
            })
            .collect()
    }

    fn publish_dependency(
        &self,
        full_name: &str,
        source: &Path,
        ctx: &mut PublishContext,
        reporter: &mut dyn Reporter,
    ) -> Result<String> {
        match self.push_with_context(source, ctx, reporter) {
            Ok(outcome) => outcome.version_of(full_name).map(str::to_string).ok_or_else(|| {
                anyhow!("{} did not publish {full_name}", source.display())
            }),
            Err(e) if matches!(
                e.downcast_ref::<PublishError>(),
                Some(PublishError::VersionAlreadyPublished { .. })
            ) =>
            {
                // Unchanged since its last publish: the declared version is the published one.
                let declared = load_definitions(source)?
                    .into_iter()
                    .find(|d| d.name().is_some_and(|n| n.eq_ignore_ascii_case(full_name)))
                    .and_then(|d| d.version().map(str::to_string))
                    .ok_or_else(|| anyhow!("{} does not declare {full_name}", source.display()))?;
                reporter.info(&format!("{full_name}:{declared} is already published"));
                Ok(declared)
            }
            Err(e) => Err(e.context(format!("failed to publish local dependency {full_name}"))),
        }
    }

    fn auto_version(
        &self,
        assets: &mut [Asset],
        order: &[usize],
        checksum: &str,
        ctx: &mut PublishContext,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        for &index in order {
            let current = materialize_one(assets, index);
            let asset = &assets[index];
            let full_name = asset.full_name.clone();
            let version = asset.version.clone();

            match self.registry.get_version(&full_name, &version)? {
                Some(existing) if existing.checksum == checksum => {
                    reporter.info(&format!(
                        "{full_name}:{version} is already published with checksum {checksum}"
                    ));
                    ctx.events
                        .emit(EventType::VersionExists { version: version.clone() }, full_name.clone());
                    assets[index].already_published = true;
                }
                Some(existing) => {
                    let mut next = calculate_next_version(&current, &existing.content)?;
                    if next == version {
                        // Same contract, different payload.
                        next = increment_version_by(&version, IncrementType::Patch)?;
                    }
                    reporter.info(&format!(
                        "Calculated next semantic version for {full_name} to be: {next}"
                    ));
                    ctx.events.emit(
                        EventType::VersionCalculated {
                            from: version.clone(),
                            to: next.clone(),
                        },
                        full_name.clone(),
                    );
                    assets[index].version = next;
                }
                None => {
                    if self
                        .registry
                        .get_latest_version_before(&full_name, &version)?
                        .is_some()
                    {
                        return Err(PublishError::ManualVersionChange {
                            name: full_name,
                            version,
                        }
                        .into());
                    }
                    reporter.info(&format!("{full_name}:{version} will be the first version"));
                }
            }
        }

        if !assets.is_empty() && assets.iter().all(|a| a.already_published) {
            let first = &assets[0];
            return Err(PublishError::VersionAlreadyPublished {
                name: first.full_name.clone(),
                version: first.version.clone(),
                checksum: checksum.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn check_versions(&self, assets: &[Asset], order: &[usize]) -> Result<()> {
        for &index in order {
            let current = materialize_one(assets, index);
            let asset = &assets[index];
            let Some(previous) = self
                .registry
                .get_latest_version_before(&asset.full_name, &asset.version)?
            else {
                continue;
            };
            let previous_version = previous.content.version().ok_or_else(|| {
                anyhow!("registered version of {} has no metadata.version", asset.full_name)
            })?;
            let actual = calculate_increment_type(previous_version, &asset.version)?;
            let required = compare_definitions(&current, &previous.content)?;
            if is_increment_greater_than(required, actual) {
                return Err(PublishError::VersionIncrementNotAllowed {
                    name: asset.full_name.clone(),
                    version: asset.version.clone(),
                    previous: previous_version.to_string(),
                    actual,
                    required,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Pushes and commits the reserved versions, dependencies first, or says
    /// why the reservation should be released instead.
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        reservation: &Reservation,
        assets: &mut [Asset],
        order: &[usize],
        checksum: &str,
        repository: Option<&Repository>,
        handler: &dyn ArtifactHandler,
        directory: &Path,
        ctx: &mut PublishContext,
        reporter: &mut dyn Reporter,
    ) -> Result<Settlement> {
        let mut pending = Vec::new();
        for reserved in &reservation.versions {
            let name = reserved.content.name().unwrap_or_default();
            let Some(index) = assets
                .iter()
                .position(|a| a.full_name.eq_ignore_ascii_case(name))
            else {
                return Err(anyhow!("registry reserved a version for unknown asset {name}"));
            };
            assets[index].version = reserved.version.clone();
            if reserved.exists {
                assets[index].already_published = true;
                reporter.info(&format!("{name}:{} already exists", reserved.version));
                ctx.events.emit(
                    EventType::VersionExists {
                        version: reserved.version.clone(),
                    },
                    name,
                );
            } else {
                pending.push(index);
            }
        }
        pending.sort_by_key(|index| order.iter().position(|o| o == index));

        if self.options.dry_run {
            for &index in &pending {
                let asset = &assets[index];
                reporter.info(&format!(
                    "Dry run: would publish {}:{}",
                    asset.full_name, asset.version
                ));
            }
            return Ok(Settlement::Released("dry run".to_string()));
        }
        if pending.is_empty() {
            return Ok(Settlement::Released("all versions already exist".to_string()));
        }

        let readme = read_readme(directory)?;
        let commit = repository.and_then(|r| r.commit.clone());
        let contents = materialize(assets);
        let mut versions = Vec::with_capacity(pending.len());
        let mut committed = Vec::with_capacity(pending.len());
        for &index in &pending {
            let content = contents[index].clone();
            let reference = content.reference()?;
            let artifact = step(ctx, reporter, &format!("Pushing {reference}"), |_, r| {
                handler.push(&reference.full_name(), &reference.version, commit.as_deref(), r)
            })?;
            ctx.events.emit(
                EventType::ArtifactPushed {
                    version: reference.version.clone(),
                    artifact_type: artifact.kind.clone(),
                },
                reference.full_name(),
            );
            versions.push(AssetVersion {
                content,
                checksum: checksum.to_string(),
                readme: readme.clone(),
                repository: repository.cloned(),
                artifact: Some(artifact),
            });
            committed.push(reference);
        }

        step(ctx, reporter, "Committing version", |_, _| {
            self.registry.commit(&reservation.id, &versions)
        })?;
        ctx.events.emit(
            EventType::ReservationCommitted {
                id: reservation.id.clone(),
            },
            ALL_ASSETS,
        );
        Ok(Settlement::Committed(committed))
    }

    /// Best effort: a failing abort is reported, never returned.
    fn abort(
        &self,
        reservation: &Reservation,
        reason: &str,
        ctx: &mut PublishContext,
        reporter: &mut dyn Reporter,
    ) {
        let result = progress(reporter, "Aborting version", |_| {
            self.registry.abort(&reservation.id)
        });
        match result {
            Ok(()) => ctx.events.emit(
                EventType::ReservationAborted {
                    id: reservation.id.clone(),
                    reason: reason.to_string(),
                },
                ALL_ASSETS,
            ),
            Err(e) => reporter.warn(&format!(
                "failed to abort reservation {}: {e:#}",
                reservation.id
            )),
        }
    }

    /// Tags the commit and pushes. Failures are reported and returned
    /// alongside the created tags, never as an error.
    fn tag_and_push(
        &self,
        vcs: &dyn VcsHandler,
        committed: &[AssetReference],
        asset_count: usize,
        ctx: &mut PublishContext,
        reporter: &mut dyn Reporter,
    ) -> (Vec<String>, Option<String>) {
        let mut created = Vec::new();
        let mut failures = Vec::new();
        for reference in committed {
            let tag = if asset_count == 1 {
                format!("v{}", reference.version)
            } else {
                format!("v{}-{}", reference.version, reference.name)
            };
            reporter.info(&format!("Adding tag to {}: {tag}", vcs.name()));
            match vcs.tag(&tag) {
                Ok(true) => {
                    ctx.events
                        .emit(EventType::VcsTagged { tag: tag.clone() }, reference.full_name());
                    created.push(tag);
                }
                Ok(false) => reporter.info(&format!("Tag {tag} already exists")),
                Err(e) => {
                    let failure = format!("failed to create tag {tag}: {e:#}");
                    reporter.warn(&failure);
                    failures.push(failure);
                }
            }
        }

        if created.is_empty() {
            reporter.info(&format!("No new tags for {} - not pushing source", vcs.name()));
        } else if let Err(e) = progress(reporter, "Pushing source code", |_| vcs.push(true)) {
            let failure = format!("failed to push to {}: {e:#}", vcs.name());
            reporter.warn(&failure);
            failures.push(failure);
        }
        let tag_error = (!failures.is_empty()).then(|| failures.join("; "));
        (created, tag_error)
    }
}

/// Runs `f` as a reported step and records its start and outcome.
fn step<T>(
    ctx: &mut PublishContext,
    reporter: &mut dyn Reporter,
    label: &str,
    f: impl FnOnce(&mut PublishContext, &mut dyn Reporter) -> Result<T>,
) -> Result<T> {
    ctx.events.emit(
        EventType::StepStarted {
            step: label.to_string(),
        },
        ALL_ASSETS,
    );
    let result = progress(reporter, label, |r| f(&mut *ctx, r));
    ctx.events.emit(
        EventType::StepFinished {
            step: label.to_string(),
            success: result.is_ok(),
        },
        ALL_ASSETS,
    );
    result
}

fn verify_files(file: &Path, reporter: &mut dyn Reporter) -> Result<Vec<AssetDefinition>> {
    let display = file.display().to_string();
    if !reporter.check(&format!("{display} exists"), file.exists()) {
        return Err(PublishError::DefinitionNotFound(file.to_path_buf()).into());
    }
    if !reporter.check(&format!("{display} is file"), file.is_file()) {
        return Err(PublishError::NotAFile(file.to_path_buf()).into());
    }

    let definitions = load_definitions(file)?;
    for (index, definition) in definitions.iter().enumerate() {
        if definition.version().is_none() {
            return Err(PublishError::InvalidDefinition {
                path: file.to_path_buf(),
                reason: format!("document {} is missing metadata.version", index + 1),
            }
            .into());
        }
    }
    Ok(definitions)
}

fn verify_working_tree(vcs: &dyn VcsHandler, reporter: &mut dyn Reporter) -> Result<()> {
    if !reporter.check("Working directory is clean", vcs.is_clean()?) {
        return Err(PublishError::DirtyWorkingDirectory.into());
    }
    if !reporter.check("Working directory is up to date with remote", vcs.is_up_to_date()?) {
        return Err(PublishError::BehindRemote.into());
    }
    Ok(())
}

fn run_build(handler: &dyn ArtifactHandler, directory: &Path, reporter: &mut dyn Reporter) -> Result<()> {
    let script = directory.join(BUILD_SCRIPT);
    if !script.is_file() {
        return handler.build(reporter);
    }
    reporter.info(&format!("Running {BUILD_SCRIPT}"));
    let result = run_script(&script, directory, &mut |line| reporter.debug(line))?;
    result
        .ok(BUILD_SCRIPT)
        .map(|_| ())
        .map_err(|e| PublishError::BuildFailed(e.to_string()).into())
}

fn run_tests(handler: &dyn ArtifactHandler, directory: &Path, reporter: &mut dyn Reporter) -> Result<()> {
    let script = directory.join(TEST_SCRIPT);
    if !script.is_file() {
        return handler.test(reporter);
    }
    reporter.info(&format!("Running {TEST_SCRIPT}"));
    let result = run_script(&script, directory, &mut |line| reporter.debug(line))?;
    result
        .ok(TEST_SCRIPT)
        .map(|_| ())
        .map_err(|e| PublishError::TestsFailed(e.to_string()).into())
}

fn read_readme(directory: &Path) -> Result<Option<Readme>> {
    let path = directory.join(README_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Some(Readme::markdown(content)))
}

fn current_versions(assets: &[Asset]) -> BTreeMap<String, String> {
    assets
        .iter()
        .map(|a| (a.full_name.to_lowercase(), a.version.clone()))
        .collect()
}

/// The definition of `assets[index]` with its current version and the
/// current versions of same-file dependencies filled in.
fn materialize_one(assets: &[Asset], index: usize) -> AssetDefinition {
    let mut definition = assets[index].source.clone();
    definition.set_version(assets[index].version.clone());
    replace_references(&mut definition, &current_versions(assets));
    definition
}

fn materialize(assets: &[Asset]) -> Vec<AssetDefinition> {
    (0..assets.len()).map(|i| materialize_one(assets, i)).collect()
}
