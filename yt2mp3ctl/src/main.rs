use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = yt2mp3ctl::Cli::parse();
    if let Err(err) = yt2mp3ctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
