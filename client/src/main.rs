use clap::{Parser, Subcommand};
use client::player;
use client::probe::QueryProbe;
use log::info;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query server info over SQP
    Sqp {
        /// Query address of the server
        #[arg(short = 's', long, default_value = "127.0.0.1:8001")]
        server: SocketAddr,

        /// How long to wait for each reply
        #[arg(short = 't', long, default_value = "1000")]
        timeout_ms: u64,
    },
    /// Query server info over A2S
    A2s {
        /// Query address of the server
        #[arg(short = 's', long, default_value = "127.0.0.1:8001")]
        server: SocketAddr,

        /// How long to wait for the reply
        #[arg(short = 't', long, default_value = "1000")]
        timeout_ms: u64,
    },
    /// Join the game port as a player until the match ends
    Play {
        /// Game address of the server
        #[arg(short = 's', long, default_value = "127.0.0.1:8000")]
        server: SocketAddr,

        /// Name sent in check-in lines
        #[arg(short = 'p', long)]
        player: Option<String>,

        /// Time between check-ins, at least one millisecond
        #[arg(
            short = 'i',
            long,
            default_value = "1000",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    match args.command {
        Command::Sqp { server, timeout_ms } => {
            let probe = QueryProbe::connect(server, Duration::from_millis(timeout_ms)).await?;
            let reply = probe.sqp().await?;
            println!("version:        {}", reply.version);
            match reply.server_info {
                Some(info) => {
                    println!("server name:    {}", info.server_name);
                    println!("game type:      {}", info.game_type);
                    println!("map:            {}", info.map);
                    println!("players:        {}/{}", info.current_players, info.max_players);
                    println!("game port:      {}", info.port);
                }
                None => println!("no server info"),
            }
        }
        Command::A2s { server, timeout_ms } => {
            let probe = QueryProbe::connect(server, Duration::from_millis(timeout_ms)).await?;
            let reply = probe.a2s().await?;
            println!("server name:    {}", reply.server_name);
            println!("game:           {}", reply.game);
            println!("map:            {}", reply.map);
            println!("players:        {}/{}", reply.players, reply.max_players);
            println!("environment:    {}", reply.environment as char);
        }
        Command::Play {
            server,
            player: name,
            interval_ms,
        } => {
            let name = name.unwrap_or_else(|| format!("player-{}", std::process::id()));
            info!("Playing as {}", name);

            let mut stdout = std::io::stdout();
            let summary = player::play(
                server,
                &name,
                Duration::from_millis(interval_ms),
                None,
                |echo| {
                    let _ = stdout.write_all(echo);
                    let _ = stdout.flush();
                },
            )
            .await?;
            println!(
                "Could not read or write to server. Match likely ended after {} check-ins.",
                summary.check_ins
            );
        }
    }

    Ok(())
}
