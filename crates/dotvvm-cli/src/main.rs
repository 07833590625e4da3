use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match dotvvm_cli::run_from_env().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
