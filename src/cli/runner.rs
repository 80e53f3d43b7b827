//! Runner driving the migration workflow end to end

use std::time::Instant;

use crate::cli::args::{Args, RegistryTarget};
use crate::error::{ConnectionTarget, Result};
use crate::migrate;
use crate::output::OutputManager;
use crate::registry::{self, RegistryClient, RepositoryReference, ecr};

pub struct Runner {
    args: Args,
    output: OutputManager,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let output = if args.quiet {
            OutputManager::new_quiet()
        } else {
            OutputManager::new(args.verbose)
        };

        Self { args, output }
    }

    pub fn output(&self) -> &OutputManager {
        &self.output
    }

    pub async fn run(&self) -> Result<()> {
        let start_time = Instant::now();

        self.output.section("Docker Image Migrator");

        // Validated before any network activity
        let (src_target, dest_target) = self.args.resolve_targets()?;

        self.output.info(&format!(
            "Migrating {}/{}:{} -> {}/{}:{}",
            src_target.url,
            src_target.repository,
            src_target.tag,
            dest_target.url,
            dest_target.repository,
            dest_target.tag
        ));

        // Source first, destination second
        let (src_client, src_ref) = self
            .connect_registry(&src_target, ConnectionTarget::Source)
            .await?;
        let (dest_client, dest_ref) = self
            .connect_registry(&dest_target, ConnectionTarget::Destination)
            .await?;

        migrate::migrate_image(&src_client, &dest_client, &src_ref, &dest_ref, &self.output)
            .await?;

        self.output.success(&format!(
            "Migration completed in {}",
            self.output.format_duration(start_time.elapsed())
        ));

        Ok(())
    }

    async fn connect_registry(
        &self,
        target: &RegistryTarget,
        side: ConnectionTarget,
    ) -> Result<(RegistryClient, RepositoryReference)> {
        let endpoint = ecr::resolve_credentials(&target.url, &self.output).await?;
        let client = registry::connect(&endpoint, side, &self.output).await?;

        Ok((
            client,
            RepositoryReference {
                endpoint,
                repository: target.repository.clone(),
                tag: target.tag.clone(),
            },
        ))
    }
}
