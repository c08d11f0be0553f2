use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Weekday};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use pitchbook::calendar::{parse_date, parse_time};
use pitchbook::clock::SystemClock;
use pitchbook::compactor::{compact_if_due, run_compactor};
use pitchbook::config::Config;
use pitchbook::engine::{BookingRequest, Engine, EngineError};
use pitchbook::model::{FieldSchedule, OperatingHours};
use pitchbook::store::WalStore;

#[derive(Debug, Parser)]
#[command(name = "pitchbook", version, about = "Football field booking engine")]
struct Args {
    /// Directory holding the booking log. Overrides PITCHBOOK_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage fields.
    #[command(subcommand)]
    Field(FieldCommand),
    /// Slot grid for one or more days.
    Availability {
        field_id: Ulid,
        #[arg(value_parser = date_arg)]
        date: NaiveDate,
        #[arg(long, default_value_t = 1)]
        days: u32,
    },
    /// Free ranges left on a day.
    Free {
        field_id: Ulid,
        #[arg(value_parser = date_arg)]
        date: NaiveDate,
    },
    /// Request a booking, either from flags or from a JSON request body.
    Book {
        #[arg(long, conflicts_with_all = ["field_id", "date", "start", "end", "user", "notes"])]
        json: Option<String>,
        #[arg(long, required_unless_present = "json")]
        field_id: Option<Ulid>,
        #[arg(long, required_unless_present = "json")]
        date: Option<String>,
        #[arg(long, required_unless_present = "json")]
        start: Option<String>,
        #[arg(long, required_unless_present = "json")]
        end: Option<String>,
        #[arg(long, required_unless_present = "json")]
        user: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    Confirm { id: Ulid },
    Cancel { id: Ulid },
    Complete { id: Ulid },
    /// A user's bookings, newest first.
    Bookings { user: String },
    /// A user's booking statistics.
    Stats { user: String },
    /// Rewrite the log to its minimal form.
    Compact,
    /// Hold the store open with background compaction and metrics until
    /// Ctrl+C. Other commands on the same data directory are refused meanwhile.
    Run,
}

#[derive(Debug, Subcommand)]
enum FieldCommand {
    /// Create a field, or replace its schedule when --id is given.
    Add {
        #[arg(long)]
        id: Option<Ulid>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        price: Decimal,
        #[arg(long, value_parser = time_arg, default_value = "08:00")]
        open: NaiveTime,
        #[arg(long, value_parser = time_arg, default_value = "22:00")]
        close: NaiveTime,
        /// Days the field is closed, e.g. `--closed sun --closed mon`.
        #[arg(long)]
        closed: Vec<Weekday>,
    },
    Deactivate { id: Ulid },
    List,
}

fn date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).ok_or_else(|| format!("expected YYYY-MM-DD, got {s:?}"))
}

fn time_arg(s: &str) -> Result<NaiveTime, String> {
    parse_time(s).ok_or_else(|| format!("expected HH:MM, got {s:?}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(dir) = args.data_dir.clone() {
        config.data_dir = dir;
    }

    match run(args.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.user_message(&config.calendar()));
            if e.is_client_error() {
                ExitCode::from(1)
            } else {
                error!("{e}");
                ExitCode::from(2)
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), EngineError> {
    let out = serde_json::to_string_pretty(value).map_err(|e| EngineError::Storage(e.to_string()))?;
    println!("{out}");
    Ok(())
}

async fn run(command: Command, config: &Config) -> Result<(), EngineError> {
    let store = Arc::new(WalStore::open(&config.wal_path())?);
    let engine = Engine::new(store.clone(), Arc::new(SystemClock), config.engine_settings());

    match command {
        Command::Field(cmd) => run_field(cmd, &store).await?,
        Command::Availability { field_id, date, days } => {
            if days == 1 {
                print_json(&engine.get_day_availability(field_id, date).await?)?;
            } else {
                print_json(&engine.get_availability_range(field_id, date, days).await?)?;
            }
        }
        Command::Free { field_id, date } => {
            let calendar = engine.calendar();
            let windows: Vec<String> = engine
                .get_free_windows(field_id, date)
                .await?
                .iter()
                .map(|w| {
                    let end = calendar
                        .local_time(w.end)
                        .map(|t| t.format("%H:%M").to_string())
                        .unwrap_or_default();
                    format!("{}-{end}", calendar.display(w.start))
                })
                .collect();
            print_json(&windows)?;
        }
        Command::Book {
            json,
            field_id,
            date,
            start,
            end,
            user,
            notes,
        } => {
            let request = match json {
                Some(body) => BookingRequest::from_json(&body)?,
                None => BookingRequest {
                    field_id: field_id.unwrap_or(Ulid::nil()),
                    date: date.unwrap_or_default(),
                    start_time: start.unwrap_or_default(),
                    end_time: end.unwrap_or_default(),
                    user_id: user.unwrap_or_default(),
                    notes,
                },
            };
            print_json(&engine.request_booking(&request).await?)?;
        }
        Command::Confirm { id } => print_json(&engine.confirm_booking(id).await?)?,
        Command::Cancel { id } => print_json(&engine.cancel_booking(id).await?)?,
        Command::Complete { id } => print_json(&engine.complete_booking(id).await?)?,
        Command::Bookings { user } => print_json(&engine.list_user_bookings(&user).await?)?,
        Command::Stats { user } => print_json(&engine.user_stats(&user).await?)?,
        Command::Compact => {
            let events = store.compact().await?;
            println!("compacted to {events} event(s)");
        }
        Command::Run => {
            pitchbook::observability::init(config.metrics_port).map_err(EngineError::Storage)?;
            info!("pitchbook running on {}", config.wal_path().display());
            info!("  compact threshold: {}", config.compact_threshold);
            let compactor = tokio::spawn(run_compactor(
                store.clone(),
                config.compact_threshold,
                Duration::from_secs(30),
            ));
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| EngineError::Storage(e.to_string()))?;
            info!("shutdown signal received");
            compactor.abort();
        }
    }

    compact_if_due(&store, config.compact_threshold).await;
    Ok(())
}

async fn run_field(cmd: FieldCommand, store: &WalStore) -> Result<(), EngineError> {
    match cmd {
        FieldCommand::Add {
            id,
            name,
            price,
            open,
            close,
            closed,
        } => {
            let hours = OperatingHours::new(open, close).ok_or_else(|| {
                EngineError::InvalidRange(format!(
                    "opening time {} must be before closing time {}",
                    open.format("%H:%M"),
                    close.format("%H:%M")
                ))
            })?;
            let mut schedule = FieldSchedule::uniform(id.unwrap_or_else(Ulid::new), name, price, hours);
            for day in closed {
                schedule.set_hours(day, None);
            }
            store.upsert_field(schedule.clone()).await?;
            print_json(&schedule)
        }
        FieldCommand::Deactivate { id } => {
            store.deactivate_field(id).await?;
            println!("field {id} deactivated");
            Ok(())
        }
        FieldCommand::List => print_json(&store.list_fields().await),
    }
}
