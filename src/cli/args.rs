//! Command-line argument parsing

use clap::Parser;

use crate::error::{MigrationError, Result};

#[derive(Parser, Debug)]
#[command(name = "docker-image-migrator")]
#[command(about = "Migrate a Docker image between registries, including Amazon ECR")]
#[command(version)]
pub struct Args {
    /// URL of the source registry
    #[arg(long = "src-url", help = "URL of the source registry")]
    pub src_url: String,

    /// Name of the source repository
    #[arg(long = "src-repo", help = "Name of the source repository")]
    pub src_repo: Option<String>,

    /// Name of the source tag
    #[arg(long = "src-tag", help = "Name of the source tag")]
    pub src_tag: Option<String>,

    /// URL of the destination registry
    #[arg(long = "dest-url", help = "URL of the destination registry")]
    pub dest_url: String,

    /// Name of the destination repository
    #[arg(long = "dest-repo", help = "Name of the destination repository")]
    pub dest_repo: Option<String>,

    /// Name of the destination tag
    #[arg(long = "dest-tag", help = "Name of the destination tag")]
    pub dest_tag: Option<String>,

    /// Repository used for both sides unless overridden
    #[arg(
        long = "repo",
        help = "The repository in the source and the destination. Values provided by --src-repo or --dest-repo override this value"
    )]
    pub repo: Option<String>,

    /// Tag used for both sides unless overridden
    #[arg(
        long = "tag",
        default_value = "latest",
        help = "The tag name in the source and the destination. Values provided by --src-tag or --dest-tag override this value"
    )]
    pub tag: String,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet output (errors and warnings only)
    #[arg(long = "quiet", short = 'q', help = "Only print errors and warnings")]
    pub quiet: bool,
}

/// One side of the migration before credential resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryTarget {
    pub url: String,
    pub repository: String,
    pub tag: String,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Apply the --repo/--tag fallbacks and validate both repository names.
    ///
    /// Runs before any network activity; a missing repository name is a
    /// configuration error, not a connection error.
    pub fn resolve_targets(&self) -> Result<(RegistryTarget, RegistryTarget)> {
        let src_repo = non_empty(self.src_repo.as_deref()).or(non_empty(self.repo.as_deref()));
        let dest_repo = non_empty(self.dest_repo.as_deref()).or(non_empty(self.repo.as_deref()));

        let Some(src_repo) = src_repo else {
            return Err(MigrationError::Config(
                "A source repository name is required either with --src-repo or --repo"
                    .to_string(),
            ));
        };
        let Some(dest_repo) = dest_repo else {
            return Err(MigrationError::Config(
                "A destination repository name is required either with --dest-repo or --repo"
                    .to_string(),
            ));
        };

        let src_tag = non_empty(self.src_tag.as_deref()).unwrap_or_else(|| self.tag.clone());
        let dest_tag = non_empty(self.dest_tag.as_deref()).unwrap_or_else(|| self.tag.clone());

        Ok((
            RegistryTarget {
                url: self.src_url.clone(),
                repository: src_repo,
                tag: src_tag,
            },
            RegistryTarget {
                url: self.dest_url.clone(),
                repository: dest_repo,
                tag: dest_tag,
            },
        ))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}
