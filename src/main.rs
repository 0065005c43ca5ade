pub mod models {
    pub mod thermostat;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
    pub mod store;
}
pub mod schema;
pub mod utils;
pub mod services {
    pub mod control;
    pub mod daemon;
    #[cfg(test)]
    pub mod fakes;
    pub mod thermostat;
}

use crate::client::ShellyClient;
use crate::config::Config;
use crate::db::store::PgStore;
use crate::services::daemon::ThermostatDaemon;
use crate::services::thermostat::Thermostat;
use diesel::PgConnection;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{error, info};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const DEFAULT_HISTORY_LIMIT: i64 = 20;

const USAGE: &str = "usage: home-thermostat [--env-file PATH] [daemon | status | history [N] | sync | boiler on|off | enable | disable | target CELSIUS]";

/// What the binary was asked to do. Everything except `Daemon` is a one-shot
/// operator command against the same store and relay the daemon uses.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Daemon,
    Status,
    History(i64),
    Sync,
    Boiler(bool),
    Enable(bool),
    Target(f64),
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    env_file: Option<PathBuf>,
    command: Command,
}

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| format!("encoding output failed: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn run(command: Command) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (relay={}, control_interval={}s, sync_interval={}s, hysteresis={}°C, relay_timeout={}s, max_reading_age={})",
        cfg.relay_host,
        cfg.control_interval.as_secs(),
        cfg.sync_interval.as_secs(),
        cfg.hysteresis_c,
        cfg.relay_timeout.as_secs(),
        cfg.max_reading_age
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "-".to_string()),
    );

    // 2) Connect DB and apply pending migrations
    let mut conn = PgConnection::establish(&cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");
    apply_database_migrations(&mut conn)?;

    // 3) Wire store, relay and thermostat
    let store = PgStore::new(conn).with_max_reading_age(cfg.max_reading_age);
    let relay = ShellyClient::new(&cfg.relay_host, cfg.relay_timeout);
    let thermostat = Arc::new(Thermostat::new(store, relay, cfg.hysteresis_c));

    // 4) Run the requested command
    match command {
        Command::Daemon => {
            let daemon = ThermostatDaemon::new(Arc::clone(&thermostat), cfg.schedule());
            let (handle, _stop) = daemon
                .spawn()
                .map_err(|e| format!("starting thermostat daemon failed: {}", e))?;
            handle
                .join()
                .map_err(|_| "thermostat daemon thread panicked".to_string())?;
        }
        Command::Status => {
            let status = thermostat.status_full().map_err(|e| e.to_string())?;
            print_json(&status)?;
        }
        Command::History(limit) => {
            let rows = thermostat.recent_actions(limit).map_err(|e| e.to_string())?;
            print_json(&rows)?;
        }
        Command::Sync => {
            let outcome = thermostat.sync_boiler_with_shelly().map_err(|e| e.to_string())?;
            print_json(&outcome)?;
            if !outcome.is_synced() {
                return Err("relay unreachable; boiler status left unchanged".to_string());
            }
        }
        Command::Boiler(on) => thermostat.set_boiler(on).map_err(|e| e.to_string())?,
        Command::Enable(enabled) => thermostat.set_thermostat_enabled(enabled).map_err(|e| e.to_string())?,
        Command::Target(celsius) => thermostat.set_target_temperature(celsius).map_err(|e| e.to_string())?,
    }

    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = OsString>) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;
    let mut words: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        let arg = arg.into_string().map_err(|_| "argument contains invalid UTF-8".to_string())?;
        if arg == "--env-file" || arg.starts_with("--env-file=") {
            if env_file.is_some() {
                return Err("`--env-file` provided more than once".to_string());
            }
            let value = match arg.strip_prefix("--env-file=") {
                Some(v) => v.to_string(),
                None => args
                    .next()
                    .and_then(|v| v.into_string().ok())
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            };
            if value.is_empty() {
                return Err("`--env-file` requires a path argument".to_string());
            }
            env_file = Some(PathBuf::from(value));
        } else if arg.starts_with("--") {
            return Err(format!("unrecognised argument: {}", arg));
        } else {
            words.push(arg);
        }
    }

    Ok(CliArgs {
        env_file,
        command: parse_command(&words)?,
    })
}

fn parse_command(words: &[String]) -> Result<Command, String> {
    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    let command = match words.as_slice() {
        [] | ["daemon"] => Command::Daemon,
        ["status"] => Command::Status,
        ["history"] => Command::History(DEFAULT_HISTORY_LIMIT),
        ["history", n] => match n.parse::<i64>() {
            Ok(v) if v > 0 => Command::History(v),
            _ => return Err(format!("history limit must be a positive number, got {}", n)),
        },
        ["sync"] => Command::Sync,
        ["boiler", "on"] => Command::Boiler(true),
        ["boiler", "off"] => Command::Boiler(false),
        ["enable"] => Command::Enable(true),
        ["disable"] => Command::Enable(false),
        ["target", v] => Command::Target(
            v.parse::<f64>()
                .map_err(|_| format!("target must be a temperature in °C, got {}", v))?,
        ),
        _ => return Err(format!("unrecognised command: {}\n{}", words.join(" "), USAGE)),
    };
    Ok(command)
}

fn configure_env(explicit: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }

    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if !default_path.is_file() {
        return Ok(None);
    }
    load_env_file(&default_path)?;
    Ok(Some(LoadedEnvFile {
        path: default_path,
        explicit: false,
    }))
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    for (index, line) in contents.lines().enumerate() {
        let Some((key, value)) =
            parse_env_assignment(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        // Values already in the process environment win over the file.
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets;
            // this runs before any other thread is started.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    Ok(())
}

/// Parse one `KEY=value` line. Blank lines and `#` comments yield `None`.
/// Values may be wrapped in single or double quotes; unquoted values end at `#`.
fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let trimmed = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);

    let (key, raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(format!("invalid environment variable name: {:?}", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let rest = &raw[1..];
            let end = rest
                .find(q)
                .ok_or_else(|| format!("unterminated {} quoted value", if q == '"' { "double" } else { "single" }))?;
            let tail = rest[end + 1..].trim();
            if !(tail.is_empty() || tail.starts_with('#')) {
                return Err("unexpected characters after closing quote".to_string());
            }
            rest[..end].to_string()
        }
        _ => raw.split('#').next().unwrap_or_default().trim_end().to_string(),
    };

    Ok(Some((key.to_string(), value)))
}

fn main() {
    let args = match parse_args(std::env::args_os().skip(1)) {
        Ok(a) => a,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(2);
        }
    };
    let loaded_env = match configure_env(args.env_file) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "home-thermostat {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(args.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
