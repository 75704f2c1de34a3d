use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use collector_layers::aws_setup;
use collector_layers::build::{run_build, BuildOptions, BuildResult};
use collector_layers::cli::{BuildArgs, CliArgs, Commands, GlobalArgs, PublishArgs};
use collector_layers::command::SystemRunner;
use collector_layers::config::{Settings, SettingsOverrides};
use collector_layers::console;
use collector_layers::dependencies::{map_dependencies, DependencyTable};
use collector_layers::distribution::{
    custom_tags, description_tags, DistributionTable, DEFAULT_DISTRIBUTION,
};
use collector_layers::github::{publish_summary, WorkflowFiles};
use collector_layers::identity::{build_identity, IdentityInput};
use collector_layers::publish::{publish_layer, PublishOutcome, PublishRequest};
use collector_layers::release::{job_matrices, release_info};
use collector_layers::report::{
    fetch_records, filter_by_arn, group_records, render_layers_report, render_release_notes,
};

const LOCAL_RELEASE_GROUP: &str = "local";

fn init_tracing(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = if env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse_lossy(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn workflow_files() -> WorkflowFiles {
    WorkflowFiles::new(
        env::var_os("GITHUB_OUTPUT").map(PathBuf::from),
        env::var_os("GITHUB_STEP_SUMMARY").map(PathBuf::from),
    )
}

fn load_settings(global: &GlobalArgs) -> Result<Settings> {
    let overrides = SettingsOverrides {
        metadata_table: global.metadata_table.clone(),
        metadata_region: global.metadata_region.clone(),
        distributions_file: global.distributions_file.clone(),
        dependencies_file: global.dependencies_file.clone(),
        components_dir: global.components_dir.clone(),
    };
    Settings::load(global.config.as_deref(), &overrides)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("\n❌ Error: {}", err);

        if let Some(cause) = err.source() {
            eprintln!("\nCaused by:");
            let mut current = Some(cause);
            let mut i = 0;
            while let Some(e) = current {
                eprintln!("  {}: {}", i, e);
                current = e.source();
                i += 1;
            }
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.global.verbose);
    let settings = load_settings(&args.global)?;
    let profile = args.global.aws_profile.as_deref();

    match args.command {
        Commands::Resolve {
            distribution,
            list,
            show_dependencies,
        } => resolve_command(&settings, &distribution, list, show_dependencies),
        Commands::Build(build) => build_command(&settings, &build).map(|_| ()),
        Commands::Publish(publish) => publish_command(&settings, &publish, profile).await,
        Commands::Run {
            build,
            publish,
            layer_name,
            region,
            public,
        } => {
            let result = build_command(&settings, &build)?;
            if !publish {
                return Ok(());
            }
            let Some(region) = region else {
                bail!("--region (or AWS_REGION) is required with --publish");
            };
            let request =
                local_publish_request(&settings, &build, &result, &layer_name, &region, public)?;
            let outcome = execute_publish(&settings, &request, profile).await?;
            console::print_publish_outcome(&outcome);
            Ok(())
        }
        Commands::ReleaseInfo {
            distribution,
            collector_version,
            release_group,
        } => {
            let table = DistributionTable::load(&settings.distributions_file)?;
            let info = release_info(&table, &distribution, &collector_version, &release_group)?;
            if info.fell_back {
                console::print_warning(&format!(
                    "Distribution '{}' not found, using build tags of '{}'",
                    distribution, DEFAULT_DISTRIBUTION
                ));
            }
            let files = workflow_files();
            files.set_output("tag", &info.tag)?;
            files.set_output("title", &info.title)?;
            files.set_output("build_tags", &info.build_tags)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Commands::ReleaseNotes {
            distribution,
            collector_version,
            output,
            template_dir,
        } => {
            let table = DistributionTable::load(&settings.distributions_file)?;
            let tags = table
                .resolve_with_fallback(&distribution, DEFAULT_DISTRIBUTION)?
                .tags;
            let store = aws_setup::metadata_store(
                &settings.metadata_region,
                &settings.metadata_table,
                &settings.metadata_index,
                profile,
            )
            .await;
            let records = fetch_records(&store, std::slice::from_ref(&distribution)).await;
            let notes = render_release_notes(
                &distribution,
                &collector_version,
                &tags,
                &records,
                template_dir.as_deref(),
            )?;
            match output {
                Some(path) => {
                    fs::write(&path, &notes)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    console::print_success(&format!("Release notes written to {}", path.display()));
                }
                None => print!("{}", notes),
            }
            Ok(())
        }
        Commands::Report {
            pattern,
            output,
            template_dir,
        } => report_command(&settings, pattern, &output, template_dir, profile).await,
        Commands::Matrix {
            architecture,
            aws_region,
        } => {
            let (build, release) =
                job_matrices(&architecture, &aws_region, &settings.release_regions)?;
            let build_json = serde_json::to_string(&build)?;
            let release_json = serde_json::to_string(&release)?;
            let files = workflow_files();
            files.set_output("build_matrix", &build_json)?;
            files.set_output("release_matrix", &release_json)?;
            println!("build_matrix={}", build_json);
            println!("release_matrix={}", release_json);
            Ok(())
        }
    }
}

fn resolve_command(
    settings: &Settings,
    distribution: &str,
    list: bool,
    show_dependencies: bool,
) -> Result<()> {
    let table = DistributionTable::load(&settings.distributions_file)?;
    if list {
        console::print_distributions(&table);
        return Ok(());
    }

    let tags = table.resolve(distribution)?;
    console::print_list(&format!("Build tags for '{}'", distribution), &tags);
    if show_dependencies {
        let dependencies = DependencyTable::load(&settings.dependencies_file)?;
        let modules: Vec<String> = map_dependencies(&tags, &dependencies).into_iter().collect();
        console::print_list("Go modules", &modules);
    }
    Ok(())
}

fn build_command(settings: &Settings, args: &BuildArgs) -> Result<BuildResult> {
    let build_tags = match &args.build_tags {
        Some(tags) => custom_tags(tags),
        None => DistributionTable::load(&settings.distributions_file)?.resolve(&args.distribution)?,
    };
    let dependencies = DependencyTable::load(&settings.dependencies_file)?;
    let modules = map_dependencies(&build_tags, &dependencies);
    tracing::info!(
        distribution = %args.distribution,
        architecture = %args.architecture,
        tags = build_tags.len(),
        modules = modules.len(),
        "Starting build"
    );

    let options = BuildOptions {
        upstream_repo: args
            .upstream_repo
            .clone()
            .unwrap_or_else(|| settings.upstream_repo.clone()),
        upstream_ref: args
            .upstream_ref
            .clone()
            .unwrap_or_else(|| settings.upstream_ref.clone()),
        distribution: args.distribution.clone(),
        architecture: args.architecture,
        build_tags,
        modules,
        upstream_version: args.upstream_version.clone(),
        components_dir: settings.components_dir.clone(),
        output_dir: args.output_dir.clone(),
        keep_temp: args.keep_temp,
    };

    let spinner = console::spinner(&format!(
        "Building {} ({})...",
        args.distribution, args.architecture
    ));
    let result = run_build(&SystemRunner, &options);
    spinner.finish_and_clear();
    let result = result?;

    for module in &result.dependencies.unpinned {
        console::print_warning(&format!("{} was fetched without a version constraint", module));
    }
    for module in &result.dependencies.failed {
        console::print_warning(&format!("Failed to fetch {}", module));
    }
    if let Some(dir) = &result.work_dir {
        console::print_step(&format!("Build directory kept at {}", dir.display()));
    }
    console::print_success(&format!(
        "Built {} (collector {})",
        result.artifact_path.display(),
        result.upstream_version
    ));
    Ok(result)
}

async fn publish_command(
    settings: &Settings,
    args: &PublishArgs,
    profile: Option<&str>,
) -> Result<()> {
    let identity = build_identity(&IdentityInput {
        base_name: &args.layer_name,
        architecture: args.architecture,
        distribution: args.distribution.as_deref(),
        explicit_version: args.layer_version.as_deref(),
        collector_version: args.collector_version.as_deref(),
        git_ref: args.git_ref.as_deref(),
        release_group: &args.release_group,
    })?;
    tracing::info!(layer = %identity.name, region = %args.region, "Derived layer identity");

    let compatible_runtimes = args.compatible_runtimes();
    let build_tags = description_tags(
        &settings.distributions_file,
        args.build_tags.as_deref(),
        args.distribution.as_deref(),
    )?;

    let request = PublishRequest {
        identity,
        base_name: args.layer_name.clone(),
        artifact_path: args.artifact_path.clone(),
        region: args.region.clone(),
        distribution: args.distribution.clone(),
        build_tags,
        collector_version: args.collector_version.clone(),
        compatible_runtimes,
        make_public: args.public,
    };

    let outcome = execute_publish(settings, &request, profile).await?;
    console::print_publish_outcome(&outcome);
    Ok(())
}

fn local_publish_request(
    settings: &Settings,
    build: &BuildArgs,
    result: &BuildResult,
    layer_name: &str,
    region: &str,
    public: bool,
) -> Result<PublishRequest> {
    let identity = build_identity(&IdentityInput {
        base_name: layer_name,
        architecture: Some(build.architecture),
        distribution: Some(build.distribution.as_str()),
        collector_version: Some(result.upstream_version.as_str()),
        release_group: LOCAL_RELEASE_GROUP,
        ..Default::default()
    })?;
    Ok(PublishRequest {
        identity,
        base_name: layer_name.to_string(),
        artifact_path: result.artifact_path.clone(),
        region: region.to_string(),
        distribution: Some(build.distribution.clone()),
        build_tags: description_tags(
            &settings.distributions_file,
            build.build_tags.as_deref(),
            Some(build.distribution.as_str()),
        )?,
        collector_version: Some(result.upstream_version.clone()),
        compatible_runtimes: settings.default_runtimes.clone(),
        make_public: public,
    })
}

async fn execute_publish(
    settings: &Settings,
    request: &PublishRequest,
    profile: Option<&str>,
) -> Result<PublishOutcome> {
    let registry = aws_setup::layer_registry(&request.region, profile).await;
    let store = aws_setup::metadata_store(
        &settings.metadata_region,
        &settings.metadata_table,
        &settings.metadata_index,
        profile,
    )
    .await;

    let spinner = console::spinner(&format!("Publishing {}...", request.identity.name));
    let outcome = publish_layer(&registry, &store, request).await;
    spinner.finish_and_clear();
    let outcome = outcome
        .with_context(|| format!("Failed to publish layer {}", request.identity.name))?;

    let files = workflow_files();
    let outputs = files
        .set_output("skip_publish", &outcome.reused.to_string())
        .and_then(|_| files.set_output("layer_arn", &outcome.layer_arn))
        .and_then(|_| files.append_summary(&publish_summary(&outcome)));
    if let Err(e) = outputs {
        tracing::warn!(error = %e, "Failed to write workflow outputs");
    }
    Ok(outcome)
}

async fn report_command(
    settings: &Settings,
    pattern: Option<String>,
    output: &Path,
    template_dir: Option<PathBuf>,
    profile: Option<&str>,
) -> Result<()> {
    let table = DistributionTable::load(&settings.distributions_file)?;
    let distributions: Vec<String> = table.names().map(str::to_string).collect();
    let store = aws_setup::metadata_store(
        &settings.metadata_region,
        &settings.metadata_table,
        &settings.metadata_index,
        profile,
    )
    .await;

    let spinner = console::spinner("Querying layer metadata...");
    let records = fetch_records(&store, &distributions).await;
    spinner.finish_and_clear();

    let records = match pattern.as_deref() {
        Some(pattern) => filter_by_arn(records, pattern)?,
        None => records,
    };
    let groups = group_records(&records, &distributions);
    let report = render_layers_report(
        &groups,
        &settings.metadata_table,
        pattern.as_deref(),
        Utc::now(),
        template_dir.as_deref(),
    )?;
    fs::write(output, report).with_context(|| format!("Failed to write {}", output.display()))?;
    console::print_success(&format!(
        "Report with {} layers written to {}",
        records.len(),
        output.display()
    ));
    Ok(())
}
