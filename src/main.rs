//! Binary entry point
//!
//! Parses arguments, runs the migration, and maps the typed result to a
//! process exit status. All failure reporting happens here, as one
//! diagnostic line per run.

use docker_image_migrator::cli::{Args, Runner};

#[tokio::main]
async fn main() {
    let args = Args::parse_args();
    let runner = Runner::new(args);

    let exit_code = match runner.run().await {
        Ok(()) => 0,
        Err(err) => {
            runner.output().error(&err.to_string());
            1
        }
    };

    std::process::exit(exit_code);
}
