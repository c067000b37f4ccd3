//! Offline fairness checks: a single revealed seed, or the rounds archived in
//! a RocksDB directory.

use clap::{Parser, Subcommand};
use roundhouse::{
    fairness::{self, DEFAULT_CLIENT_SEED},
    games::{GameType, Outcome},
    services::RoundSink,
    storage::RocksRoundStore,
};

#[derive(Parser)]
#[command(name = "verify_round")]
#[command(about = "Recompute round outcomes from revealed seeds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one revealed seed against its published hash
    Seed {
        #[arg(long)]
        server_seed: String,

        #[arg(long)]
        hashed_server_seed: String,

        #[arg(long)]
        nonce: u64,

        /// crash | roulette
        #[arg(long)]
        game: GameType,

        #[arg(long, default_value = DEFAULT_CLIENT_SEED)]
        client_seed: String,
    },

    /// Audit the newest archived rounds of a game
    Archive {
        #[arg(short, long, default_value = "./DB/roundhouse")]
        data_dir: String,

        #[arg(long)]
        game: GameType,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Crash { crash_point } => format!("crash point {:.2}x", crash_point),
        Outcome::Roulette { number, category } => format!("number {} ({})", number, category),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let all_valid = match cli.command {
        Commands::Seed {
            server_seed,
            hashed_server_seed,
            nonce,
            game,
            client_seed,
        } => {
            let check = fairness::verify(&server_seed, &client_seed, nonce, &hashed_server_seed, game);
            println!("🔍 {} nonce {}", game, nonce);
            println!("   Published hash: {}", hashed_server_seed);
            println!("   Computed hash:  {}", check.computed_hash);
            println!("   Outcome:        {}", describe(&check.outcome));
            if check.valid {
                println!("✅ Seed matches its commitment");
            } else {
                println!("❌ Seed does NOT match its commitment");
            }
            check.valid
        }
        Commands::Archive { data_dir, game, limit } => {
            let store = match RocksRoundStore::open(&data_dir) {
                Ok(store) => store,
                Err(e) => {
                    eprintln!("❌ Cannot open {}: {}", data_dir, e);
                    std::process::exit(2);
                }
            };
            let rounds = match store.recent_rounds(game, limit).await {
                Ok(rounds) => rounds,
                Err(e) => {
                    eprintln!("❌ Cannot read rounds: {}", e);
                    std::process::exit(2);
                }
            };

            println!("🔍 Auditing {} archived {} rounds in {}", rounds.len(), game, data_dir);
            let mut valid = true;
            for record in &rounds {
                let audit = fairness::verify_round(record);
                if audit.is_valid() {
                    println!("   ✅ {} nonce {} -> {}", record.id, record.nonce, describe(&record.outcome));
                } else {
                    valid = false;
                    println!(
                        "   ❌ {} nonce {}: hash ok={}, published {}, recomputed {}",
                        record.id,
                        record.nonce,
                        audit.hash_matches,
                        describe(&record.outcome),
                        describe(&audit.recomputed)
                    );
                }
            }
            valid
        }
    };

    if !all_valid {
        std::process::exit(1);
    }
}
