use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use bot_api::{serve, BotApi};
use contracts::{BotConfig, Pos, StrategyRequest, TorchSide};

fn print_usage() {
    println!("bot-cli <command>");
    println!("commands:");
    println!("  status");
    println!("  step [n]");
    println!("  run-to <tick>");
    println!("  move <x> <y> <z>");
    println!("    walks the agent to the target and reports the outcome");
    println!("  tunnel <ox> <oy> <oz> <dx> <dz> <length> [none|floor|left|right|both]");
    println!("  serve [addr]");
    println!("    default addr: 127.0.0.1:8080");
    println!("  simulate <run_id> <seed> [ticks] [sqlite_path]");
    println!("    runs a deterministic scripted run to the target tick and persists to sqlite");
}

fn parse_u64(value: Option<&String>, label: &str) -> Result<u64, String> {
    let raw = value.ok_or_else(|| format!("missing {}", label))?;
    raw.parse::<u64>()
        .map_err(|_| format!("invalid {}: {}", label, raw))
}

fn parse_u32(value: Option<&String>, label: &str) -> Result<u32, String> {
    let raw = value.ok_or_else(|| format!("missing {}", label))?;
    raw.parse::<u32>()
        .map_err(|_| format!("invalid {}: {}", label, raw))
}

fn parse_i32(value: Option<&String>, label: &str) -> Result<i32, String> {
    let raw = value.ok_or_else(|| format!("missing {}", label))?;
    raw.parse::<i32>()
        .map_err(|_| format!("invalid {}: {}", label, raw))
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn parse_torch_side(value: Option<&String>) -> Result<TorchSide, String> {
    match value.map(String::as_str) {
        None | Some("none") => Ok(TorchSide::None),
        Some("floor") => Ok(TorchSide::Floor),
        Some("left") => Ok(TorchSide::Left),
        Some("right") => Ok(TorchSide::Right),
        Some("both") => Ok(TorchSide::Both),
        Some(other) => Err(format!("invalid torch side: {other}")),
    }
}

fn parse_pos(args: &[String], from: usize, label: &str) -> Result<Pos, String> {
    let x = parse_i32(args.get(from), &format!("{label} x"))?;
    let y = parse_i32(args.get(from + 1), &format!("{label} y"))?;
    let z = parse_i32(args.get(from + 2), &format!("{label} z"))?;
    Ok(Pos::new(x, y, z))
}

fn default_sqlite_path() -> String {
    std::env::var("GRIDBOT_SQLITE_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "gridbot_runs.sqlite".to_string())
}

fn parse_sqlite_path(value: Option<&String>) -> String {
    value
        .map(String::to_string)
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(default_sqlite_path)
}

/// Drive a single request to completion on a fresh in-memory run and report.
fn run_request(request: StrategyRequest) -> Result<(), String> {
    let config = BotConfig::default();
    let max_ticks = config.max_ticks;
    let mut api = BotApi::from_config(config);
    api.request(request)
        .map_err(|err| format!("request rejected: {}", err.message))?;
    let (status, committed) = api.run_to_tick(max_ticks);
    println!("committed={} {}", committed, status);
    println!("description: {}", api.description());
    for entry in api.journal() {
        println!("  tick={:>4} {:?} {}", entry.tick, entry.kind, entry.detail);
    }
    Ok(())
}

fn run_simulation(args: &[String]) -> Result<(), String> {
    let run_id = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing run_id".to_string())?;
    let seed = parse_u64(args.get(3), "seed")?;
    let target_tick = args
        .get(4)
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| format!("invalid ticks: {value}"))
        })
        .transpose()?
        .unwrap_or(240);
    let sqlite_path = parse_sqlite_path(args.get(5));

    let mut config = BotConfig::default();
    config.run_id = run_id.clone();
    config.seed = seed;
    config.max_ticks = target_tick.max(1);
    config.snapshot_every_ticks = 24;

    let mut api = BotApi::from_config(config);
    api.attach_sqlite_store(PathBuf::from(&sqlite_path))
        .map_err(|err| format!("failed to attach sqlite store: {err}"))?;
    api.initialize_run_storage(true)
        .map_err(|err| format!("failed to initialize run storage: {err}"))?;

    // A scripted walk keeps the run deterministic while still exercising the
    // planner, the queue, and the journal.
    api.request(StrategyRequest::MoveTo {
        target: Pos::new(12, 1, 12),
    })
    .map_err(|err| format!("request rejected: {}", err.message))?;
    let (status, committed) = api.run_to_tick(target_tick);
    let current_tick = status.current_tick;
    let max_ticks = status.max_ticks;
    api.halt();

    if let Some(error) = api.last_persistence_error() {
        return Err(format!("persistence error after simulation: {error}"));
    }

    println!(
        "simulated run_id={} seed={} committed={} tick={}/{} sqlite={}",
        run_id, seed, committed, current_tick, max_ticks, sqlite_path
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("status") => {
            let api = BotApi::from_config(BotConfig::default());
            match serde_json::to_string_pretty(&api.status()) {
                Ok(payload) => println!("{payload}"),
                Err(err) => {
                    eprintln!("error: {err}");
                    std::process::exit(1);
                }
            }
        }
        Some("step") => {
            let steps = args.get(2).and_then(|v| v.parse::<u64>().ok()).unwrap_or(1);
            let mut api = BotApi::from_config(BotConfig::default());
            let (status, committed) = api.step(steps);
            println!("stepped={} {}", committed, status);
        }
        Some("run-to") => match parse_u64(args.get(2), "tick") {
            Ok(target_tick) => {
                let mut api = BotApi::from_config(BotConfig::default());
                let (status, committed) = api.run_to_tick(target_tick);
                println!("committed={} {}", committed, status);
            }
            Err(err) => {
                eprintln!("error: {}", err);
                print_usage();
                std::process::exit(2);
            }
        },
        Some("move") => {
            let request = parse_pos(&args, 2, "target").map(|target| StrategyRequest::MoveTo {
                target,
            });
            match request.and_then(run_request) {
                Ok(()) => {}
                Err(err) => {
                    eprintln!("error: {}", err);
                    print_usage();
                    std::process::exit(2);
                }
            }
        }
        Some("tunnel") => {
            let request = parse_pos(&args, 2, "origin").and_then(|origin| {
                let dx = parse_i32(args.get(5), "dx")?;
                let dz = parse_i32(args.get(6), "dz")?;
                let length = parse_u32(args.get(7), "length")?;
                let torches = parse_torch_side(args.get(8))?;
                Ok(StrategyRequest::Tunnel {
                    origin,
                    dx,
                    dz,
                    length,
                    torches,
                })
            });
            match request.and_then(run_request) {
                Ok(()) => {}
                Err(err) => {
                    eprintln!("error: {}", err);
                    print_usage();
                    std::process::exit(2);
                }
            }
        }
        Some("serve") => match parse_socket_addr(args.get(2)) {
            Ok(addr) => {
                println!("serving api on http://{addr}");
                if let Err(err) = serve(addr).await {
                    eprintln!("server error: {err}");
                    std::process::exit(1);
                }
            }
            Err(err) => {
                eprintln!("error: {}", err);
                print_usage();
                std::process::exit(2);
            }
        },
        Some("simulate") => {
            if let Err(err) = run_simulation(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        _ => {
            print_usage();
        }
    }
}
