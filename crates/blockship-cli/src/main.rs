use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use blockship::auth::EnvTokenProvider;
use blockship::config::{Config, RegistryConfig, load_config};
use blockship::definition::load_definitions;
use blockship::pull::{install_local, pull};
use blockship::registry::RegistryClient;
use blockship::semver::compare_definitions;
use blockship::{HandlerRegistry, PublishOptions, PublishPipeline, Reporter};

#[derive(Parser, Debug)]
#[command(name = "blockship", version)]
#[command(about = "Reserve, push and commit versioned blocks to a registry")]
struct Cli {
    /// Registry API URL (default: from config or BLOCKSHIP_REGISTRY_URL)
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Print tool output and other detail.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build, version and publish the assets of a definition file.
    Push {
        /// Definition file
        #[arg(default_value = "blockship.yml")]
        file: PathBuf,

        /// Skip the clean and up-to-date working directory checks.
        #[arg(long)]
        ignore_working_directory: bool,

        #[arg(long)]
        skip_tests: bool,

        /// Reserve and report, then release without publishing.
        #[arg(long)]
        dry_run: bool,

        /// Publish the declared version instead of deriving one.
        #[arg(long)]
        no_auto_version: bool,

        /// With --no-auto-version, skip the semantic version check.
        #[arg(long)]
        no_version_check: bool,

        /// Append publish events to this JSONL file.
        #[arg(long)]
        event_log: Option<PathBuf>,
    },
    /// Pull a registered artifact (handle/name[:version]).
    Pull {
        uri: String,

        #[arg(long, default_value = ".")]
        target: PathBuf,
    },
    /// Copy the assets of a definition file into the local repository.
    Install {
        #[arg(default_value = "blockship.yml")]
        file: PathBuf,
    },
    /// Print the version increment NEW requires over OLD.
    Diff { new: PathBuf, old: PathBuf },
}

struct CliReporter {
    verbose: bool,
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }

    fn debug(&mut self, msg: &str) {
        if self.verbose {
            eprintln!("[debug] {msg}");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut reporter = CliReporter {
        verbose: cli.verbose,
    };

    match cli.cmd {
        Commands::Push {
            file,
            ignore_working_directory,
            skip_tests,
            dry_run,
            no_auto_version,
            no_version_check,
            event_log,
        } => {
            let (config, registry) = connect(cli.registry)?;
            let handlers = HandlerRegistry::new(config);
            let options = PublishOptions {
                ignore_working_directory,
                skip_tests,
                dry_run,
                auto_versioning: !no_auto_version,
                check_version: !no_version_check,
                event_log,
            };

            let started = Instant::now();
            let outcome = PublishPipeline::new(&registry, &handlers, options).push(&file, &mut reporter)?;
            reporter.info(&format!("Finished in {}", elapsed(started)));

            for reference in &outcome.references {
                let status = if outcome.committed.contains(reference) {
                    "published"
                } else if outcome.dry_run {
                    "dry run"
                } else {
                    "unchanged"
                };
                println!("{reference}: {status}");
            }
            for tag in &outcome.tags {
                println!("tag: {tag}");
            }
            if let Some(error) = &outcome.tag_error {
                println!("tag error: {error}");
            }
        }
        Commands::Pull { uri, target } => {
            let (config, registry) = connect(cli.registry)?;
            let handlers = HandlerRegistry::new(config);
            let pulled = pull(&uri, &target, &registry, &handlers, &mut reporter)?;
            let reference = pulled.content.reference()?;
            println!("{reference}: pulled into {}", target.display());
        }
        Commands::Install { file } => {
            let handlers = HandlerRegistry::new(load_config()?);
            for dir in install_local(&file, &handlers, &mut reporter)? {
                println!("installed: {}", dir.display());
            }
        }
        Commands::Diff { new, old } => run_diff(&new, &old)?,
    }

    Ok(())
}

/// Loads the configuration and opens the registry, `--registry` winning over
/// every other source.
fn connect(registry: Option<String>) -> Result<(Config, RegistryClient)> {
    let flags = Config {
        registry: RegistryConfig {
            url: registry.clone(),
        },
        ..Config::default()
    };
    let config = load_config()?.merge(&flags);
    let url = registry.unwrap_or_else(|| config.registry_url());
    let client = RegistryClient::new(&url, Box::new(EnvTokenProvider))
        .with_context(|| format!("failed to create registry client for {url}"))?;
    Ok((config, client))
}

fn run_diff(new: &Path, old: &Path) -> Result<()> {
    let old = load_definitions(old)?;
    for definition in load_definitions(new)? {
        let name = definition.name().unwrap_or_default();
        let Some(previous) = old
            .iter()
            .find(|d| d.name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
        else {
            bail!("{name} is not declared in the old definition file");
        };
        println!("{name}: {}", compare_definitions(&definition, previous)?);
    }
    Ok(())
}

fn elapsed(started: Instant) -> String {
    humantime::format_duration(Duration::from_millis(started.elapsed().as_millis() as u64)).to_string()
}
