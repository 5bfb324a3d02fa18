use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = smcctl::Cli::parse();
    if let Err(err) = smcctl::init_tracing(cli.log.as_deref()) {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
    if let Err(err) = smcctl::run(cli).await {
        tracing::error!(error = %err, "smcctl failed");
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
