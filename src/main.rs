use hrm_bridge::args::TopLevelCmd;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let arg_config: TopLevelCmd = argh::from_env();

    let shutdown = CancellationToken::new();
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    if let Err(e) = hrm_bridge::run(arg_config, shutdown).await {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}
