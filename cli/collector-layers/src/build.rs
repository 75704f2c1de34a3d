//! Collector layer build pipeline.
//!
//! Clones the upstream Lambda collector repository, overlays the local
//! `components/` tree onto it, fetches the extra Go modules required by the
//! resolved build tags, runs `make package` and moves the resulting zip to a
//! canonical `collector-{arch}-{distribution}.zip` in the output directory.

use crate::command::{run_checked, CommandRunner, CommandSpec};
use crate::distribution::join_tags;
use crate::identity::Architecture;
use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DEFAULT_UPSTREAM_REPO: &str = "open-telemetry/opentelemetry-lambda";
pub const DEFAULT_UPSTREAM_REF: &str = "main";

/// Everything a single (distribution, architecture) build needs.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub upstream_repo: String,
    pub upstream_ref: String,
    pub distribution: String,
    pub architecture: Architecture,
    pub build_tags: Vec<String>,
    /// Extra Go modules to fetch before building.
    pub modules: BTreeSet<String>,
    /// Collector version used to pin the fetched modules. Read from the
    /// upstream checkout when absent.
    pub upstream_version: Option<String>,
    pub components_dir: PathBuf,
    pub output_dir: PathBuf,
    pub keep_temp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    pub added: Vec<String>,
    /// Modules that could only be fetched without a version constraint.
    pub unpinned: Vec<String>,
    pub failed: Vec<String>,
    pub tidied: bool,
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub artifact_path: PathBuf,
    pub upstream_version: String,
    pub dependencies: DependencyReport,
    /// Set when the temporary checkout was kept.
    pub work_dir: Option<PathBuf>,
}

/// Canonical artifact file name for a build.
pub fn artifact_file_name(architecture: Architecture, distribution: &str) -> String {
    format!("collector-{}-{}.zip", architecture, distribution)
}

/// Name of the zip produced by the upstream `make package`.
pub fn upstream_artifact_name(architecture: Architecture) -> String {
    format!("opentelemetry-collector-layer-{}.zip", architecture)
}

/// Copies every file under `src` into `dst`, creating directories as needed.
/// Existing files in `dst` are overwritten.
pub fn overlay_dir(src: &Path, dst: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("Unexpected path {}", entry.path().display()))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory: {}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy file: {}", entry.path().display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Fetches `modules` into the Go module at `collector_dir`.
///
/// Each module is first requested at `@v{version}`; on failure it is retried
/// without a version. Modules that fail both ways are reported and skipped.
/// `go mod tidy` runs only when at least one module was fetched.
pub fn add_dependencies(
    runner: &dyn CommandRunner,
    collector_dir: &Path,
    modules: &BTreeSet<String>,
    version: &str,
) -> DependencyReport {
    let mut report = DependencyReport::default();
    if modules.is_empty() {
        tracing::info!("No component dependencies required");
        return report;
    }

    let version_tag = if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{}", version)
    };

    for module in modules {
        let pinned = format!("{}@{}", module, version_tag);
        let spec = CommandSpec::new("go")
            .args(["get", pinned.as_str()])
            .current_dir(collector_dir);
        match run_checked(runner, &spec) {
            Ok(_) => {
                tracing::info!(module = %pinned, "Added dependency");
                report.added.push(module.clone());
                continue;
            }
            Err(e) => tracing::warn!(
                module = %pinned,
                error = %e,
                "Pinned fetch failed, retrying without version"
            ),
        }

        let spec = CommandSpec::new("go")
            .args(["get", module.as_str()])
            .current_dir(collector_dir);
        match run_checked(runner, &spec) {
            Ok(_) => {
                tracing::info!(module = %module, "Added dependency without version constraint");
                report.added.push(module.clone());
                report.unpinned.push(module.clone());
            }
            Err(e) => {
                tracing::error!(module = %module, error = %e, "Failed to add dependency");
                report.failed.push(module.clone());
            }
        }
    }

    if report.added.is_empty() {
        tracing::warn!("No dependencies were added, skipping go mod tidy");
        return report;
    }
    let tidy = CommandSpec::new("go")
        .args(["mod", "tidy"])
        .current_dir(collector_dir);
    match run_checked(runner, &tidy) {
        Ok(_) => report.tidied = true,
        // The build itself is the real signal; carry on.
        Err(e) => tracing::error!(error = %e, "go mod tidy failed"),
    }
    report
}

/// Asks the upstream Makefile for the collector version it builds against.
pub fn detect_upstream_version(runner: &dyn CommandRunner, collector_dir: &Path) -> Result<String> {
    run_checked(
        runner,
        &CommandSpec::new("make")
            .arg("set-otelcol-version")
            .current_dir(collector_dir),
    )?;
    let version_file = collector_dir.join("VERSION");
    let version = fs::read_to_string(&version_file)
        .with_context(|| format!("VERSION file not created at {}", version_file.display()))?;
    let version = version.trim();
    if version.is_empty() {
        bail!("VERSION file is empty: {}", version_file.display());
    }
    Ok(version.to_string())
}

/// Runs the full build. The temporary checkout is removed on return unless
/// `keep_temp` is set.
pub fn run_build(runner: &dyn CommandRunner, options: &BuildOptions) -> Result<BuildResult> {
    fs::create_dir_all(&options.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            options.output_dir.display()
        )
    })?;

    let temp = tempfile::Builder::new()
        .prefix("collector-layer-build-")
        .tempdir()
        .context("Failed to create temporary build directory")?;
    tracing::info!(path = %temp.path().display(), "Using temporary build directory");

    let result = build_in(runner, options, temp.path());
    let work_dir = if options.keep_temp {
        let kept = temp.keep();
        tracing::info!(path = %kept.display(), "Keeping temporary build directory");
        Some(kept)
    } else {
        None
    };
    let mut result = result?;
    result.work_dir = work_dir;
    Ok(result)
}

fn build_in(
    runner: &dyn CommandRunner,
    options: &BuildOptions,
    work_dir: &Path,
) -> Result<BuildResult> {
    let upstream_dir = work_dir.join("upstream");
    let repo_url = format!("https://github.com/{}.git", options.upstream_repo);
    let clone_target = upstream_dir.display().to_string();
    run_checked(
        runner,
        &CommandSpec::new("git").args([
            "clone",
            "--depth",
            "1",
            "--branch",
            options.upstream_ref.as_str(),
            repo_url.as_str(),
            clone_target.as_str(),
        ]),
    )
    .with_context(|| format!("Failed to clone {}", repo_url))?;

    if options.components_dir.is_dir() {
        let copied = overlay_dir(&options.components_dir, &upstream_dir)?;
        tracing::info!(files = copied, from = %options.components_dir.display(), "Overlaid custom components");
    } else {
        tracing::warn!(
            path = %options.components_dir.display(),
            "Custom components directory not found, proceeding without overlay"
        );
    }

    let collector_dir = upstream_dir.join("collector");
    if !collector_dir.is_dir() {
        bail!(
            "Collector directory not found in upstream repository: {}",
            collector_dir.display()
        );
    }

    let upstream_version = match options.upstream_version.as_deref().filter(|v| !v.is_empty()) {
        Some(version) => version.to_string(),
        None => detect_upstream_version(runner, &collector_dir)?,
    };
    tracing::info!(version = %upstream_version, "Using upstream collector version");

    let dependencies = add_dependencies(
        runner,
        &collector_dir,
        &options.modules,
        &upstream_version,
    );

    let mut make = CommandSpec::new("make")
        .arg("package")
        .current_dir(&collector_dir)
        .env("GOARCH", options.architecture.as_str());
    let tags = join_tags(&options.build_tags);
    if !tags.is_empty() {
        make = make.env("BUILDTAGS", tags);
    }
    run_checked(runner, &make).context("Collector build failed")?;

    let build_dir = collector_dir.join("build");
    let produced = build_dir.join(upstream_artifact_name(options.architecture));
    if !produced.is_file() {
        let contents = fs::read_dir(&build_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        bail!(
            "Build output not found at {} (build directory contains: [{}])",
            produced.display(),
            contents
        );
    }

    let file_name = artifact_file_name(options.architecture, &options.distribution);
    let renamed = build_dir.join(&file_name);
    fs::rename(&produced, &renamed)
        .with_context(|| format!("Failed to rename {}", produced.display()))?;
    let artifact_path = options.output_dir.join(&file_name);
    fs::copy(&renamed, &artifact_path)
        .with_context(|| format!("Failed to copy layer to {}", artifact_path.display()))?;
    tracing::info!(path = %artifact_path.display(), "Layer artifact ready");

    Ok(BuildResult {
        artifact_path,
        upstream_version,
        dependencies,
        work_dir: None,
    })
}
