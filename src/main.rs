use fireside::{init_tracing, load_config, run_server};

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Fatal: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run_server(config).await {
        eprintln!("Fatal: {}", e);
        std::process::exit(1);
    }
}
