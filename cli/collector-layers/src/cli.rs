use crate::identity::Architecture;
use clap::{crate_authors, crate_description, Args, Parser, Subcommand};
use std::path::PathBuf;

const USAGE_EXAMPLES: &str = "\
EXAMPLES:
    # Show the build tags and Go modules of a distribution
    collector-layers resolve clickhouse --show-dependencies

    # Build the arm64 layer of the minimal distribution
    collector-layers build --distribution minimal --architecture arm64

    # Publish a built layer, making it public
    collector-layers publish --layer-name otel-collector \\
        --artifact-path build/collector-arm64-minimal.zip \\
        --region eu-west-1 --architecture arm64 --distribution minimal --public

    # Build and publish locally in one go
    collector-layers run --distribution minimal --publish --region us-east-1

    # Regenerate LAYERS.md from the metadata table
    collector-layers report --output LAYERS.md";

/// collector-layers: build custom OpenTelemetry Collector distributions and
/// publish them as AWS Lambda layers.
#[derive(Parser, Debug)]
#[command(author = crate_authors!(", "), version, about = crate_description!(), long_about = None, after_help = USAGE_EXAMPLES)]
pub struct CliArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Increase logging verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to the project configuration file (default: ./collector-layers.toml if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Distributions definition file.
    #[arg(long, global = true)]
    pub distributions_file: Option<PathBuf>,

    /// Component dependency mapping file.
    #[arg(long, global = true)]
    pub dependencies_file: Option<PathBuf>,

    /// Directory of custom components overlaid onto the upstream checkout.
    #[arg(long, global = true)]
    pub components_dir: Option<PathBuf>,

    /// DynamoDB table holding layer metadata.
    #[arg(long, global = true, env = "METADATA_TABLE")]
    pub metadata_table: Option<String>,

    /// Region of the metadata table.
    #[arg(long, global = true, env = "METADATA_REGION")]
    pub metadata_region: Option<String>,

    /// AWS profile to use. Defaults to environment/profile configuration.
    #[arg(long, global = true)]
    pub aws_profile: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a distribution to its build tags
    Resolve {
        /// Distribution name
        #[arg(default_value = "default")]
        distribution: String,

        /// List every distribution instead of resolving one
        #[arg(long)]
        list: bool,

        /// Also print the Go modules the build tags require
        #[arg(long)]
        show_dependencies: bool,
    },

    /// Build the collector layer zip for one distribution and architecture
    Build(BuildArgs),

    /// Publish a layer artifact to one region, reusing identical content
    Publish(PublishArgs),

    /// Build locally and optionally publish, using the `local` release group
    Run {
        #[command(flatten)]
        build: BuildArgs,

        /// Publish the built layer after a successful build
        #[arg(long)]
        publish: bool,

        /// Base name of the published layer
        #[arg(long, default_value = "otel-collector")]
        layer_name: String,

        /// Region to publish to
        #[arg(short, long, env = "AWS_REGION")]
        region: Option<String>,

        /// Make the published layer publicly readable
        #[arg(long)]
        public: bool,
    },

    /// Compute the release tag, title and build tags of a distribution release
    ReleaseInfo {
        #[arg(short, long, env = "DISTRIBUTION", default_value = "default")]
        distribution: String,

        /// Collector version, with or without a leading `v`
        #[arg(short, long, env = "COLLECTOR_VERSION")]
        collector_version: String,

        #[arg(long, env = "RELEASE_GROUP", default_value = "prod")]
        release_group: String,
    },

    /// Render release notes from the metadata table
    ReleaseNotes {
        #[arg(short, long, env = "DISTRIBUTION")]
        distribution: String,

        /// Collector version the layers were published for, exactly as recorded
        #[arg(short, long, env = "COLLECTOR_VERSION")]
        collector_version: String,

        /// Write the notes to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory containing a custom `release_notes.md` template
        #[arg(long)]
        template_dir: Option<PathBuf>,
    },

    /// Generate a markdown report of all published layers
    Report {
        /// Glob matched against layer ARNs, e.g. "*:layer:otel-collector-*"
        #[arg(short, long)]
        pattern: Option<String>,

        #[arg(short, long, default_value = "LAYERS.md")]
        output: PathBuf,

        /// Directory containing a custom `layers.md` template
        #[arg(long)]
        template_dir: Option<PathBuf>,
    },

    /// Compute the CI build and release job matrices
    Matrix {
        /// `all`, `amd64` or `arm64`
        #[arg(short, long, default_value = "all")]
        architecture: String,

        /// `all` or a single region
        #[arg(short = 'r', long, default_value = "all")]
        aws_region: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[arg(short, long, env = "DISTRIBUTION", default_value = "default")]
    pub distribution: String,

    #[arg(short, long, value_enum, env = "LAYER_ARCHITECTURE", default_value_t = Architecture::Amd64)]
    pub architecture: Architecture,

    /// Upstream repository in `owner/name` form
    #[arg(long)]
    pub upstream_repo: Option<String>,

    /// Branch or tag of the upstream repository
    #[arg(long)]
    pub upstream_ref: Option<String>,

    /// Collector version used to pin component modules (read from upstream when absent)
    #[arg(long, env = "COLLECTOR_VERSION")]
    pub upstream_version: Option<String>,

    /// Comma-separated build tags, bypassing distribution resolution
    #[arg(long)]
    pub build_tags: Option<String>,

    #[arg(short, long, default_value = "build")]
    pub output_dir: PathBuf,

    /// Keep the temporary build directory for inspection
    #[arg(long)]
    pub keep_temp: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// Base name of the layer
    #[arg(long, env = "LAYER_NAME")]
    pub layer_name: String,

    /// Path to the layer zip
    #[arg(long, env = "ARTIFACT_PATH")]
    pub artifact_path: PathBuf,

    #[arg(short, long, env = "AWS_REGION")]
    pub region: String,

    #[arg(short, long, value_enum, env = "LAYER_ARCHITECTURE")]
    pub architecture: Option<Architecture>,

    /// Space- or comma-separated compatible runtimes
    #[arg(long, env = "LAYER_RUNTIMES")]
    pub runtimes: Option<String>,

    #[arg(long, env = "RELEASE_GROUP", default_value = "prod")]
    pub release_group: String,

    /// Explicit version token for the layer name
    #[arg(long, env = "LAYER_VERSION")]
    pub layer_version: Option<String>,

    #[arg(short, long, env = "DISTRIBUTION")]
    pub distribution: Option<String>,

    #[arg(long, env = "COLLECTOR_VERSION")]
    pub collector_version: Option<String>,

    /// Comma-separated build tags recorded in the description (resolved from
    /// the distribution when absent)
    #[arg(long, env = "BUILD_TAGS")]
    pub build_tags: Option<String>,

    /// Git ref of the triggering build, used as a version fallback
    #[arg(long, env = "GITHUB_REF")]
    pub git_ref: Option<String>,

    /// Make a newly published version publicly readable
    #[arg(long, env = "LAYER_PUBLIC")]
    pub public: bool,
}

impl PublishArgs {
    /// Runtimes given with `--runtimes`; empty leaves them unset on the layer.
    pub fn compatible_runtimes(&self) -> Vec<String> {
        self.runtimes.as_deref().map(split_runtimes).unwrap_or_default()
    }
}

/// Splits a runtime list given as space- or comma-separated values.
pub fn split_runtimes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_publish_flags() {
        let args = CliArgs::try_parse_from([
            "collector-layers",
            "-v",
            "publish",
            "--layer-name",
            "otel",
            "--artifact-path",
            "build/x.zip",
            "--region",
            "eu-west-1",
            "--architecture",
            "x86_64",
            "--public",
        ])
        .unwrap();
        assert_eq!(args.global.verbose, 1);
        match args.command {
            Commands::Publish(publish) => {
                assert_eq!(publish.layer_name, "otel");
                assert_eq!(publish.architecture, Some(Architecture::Amd64));
                assert_eq!(publish.release_group, "prod");
                assert!(publish.public);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_split_runtimes() {
        assert_eq!(
            split_runtimes("nodejs20.x python3.12,java17 "),
            vec!["nodejs20.x", "python3.12", "java17"]
        );
        assert!(split_runtimes("  ").is_empty());
    }

    fn publish_args(extra: &[&str]) -> PublishArgs {
        let mut argv = vec![
            "collector-layers",
            "publish",
            "--layer-name",
            "otel",
            "--artifact-path",
            "build/x.zip",
            "--region",
            "eu-west-1",
        ];
        argv.extend_from_slice(extra);
        match CliArgs::try_parse_from(argv).unwrap().command {
            Commands::Publish(publish) => publish,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_publish_runtimes_have_no_default() {
        assert!(publish_args(&[]).compatible_runtimes().is_empty());
        assert!(publish_args(&["--runtimes", " "]).compatible_runtimes().is_empty());
        assert_eq!(
            publish_args(&["--runtimes", "python3.12 provided.al2023"]).compatible_runtimes(),
            vec!["python3.12", "provided.al2023"]
        );
    }
}
