use std::process::ExitCode;

use ai_post_pipeline::cli::{Cli, run};
use clap::Parser;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "Exited with error");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
