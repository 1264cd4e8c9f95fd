//! occupancy - inspect and adjust the parking counters.
//!
//! When counterd is running, requests go over its control socket so they are
//! applied by the daemon's counter service, in order with live crossings.
//! Only when nothing answers on the control address does the tool open the
//! sqlite store itself.

use anyhow::{Context, Result};
use chrono::Timelike;
use clap::{Parser, Subcommand};
use std::io::IsTerminal;

use crossing_counter::config::DEFAULT_CONTROL_ADDR;
use crossing_counter::control::{ControlClient, ControlRequest};
use crossing_counter::occupancy::{
    AdminSchedule, Occupancy, OccupancyStore, Section, SqliteOccupancyStore, GENERAL_CAPACITY,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "occupancy", about = "Inspect and adjust parking occupancy counters")]
struct Args {
    /// Path to the occupancy SQLite DB
    #[arg(long, env = "COUNTER_DB_PATH", default_value = "occupancy.db")]
    db: String,

    /// counterd control socket
    #[arg(long, env = "COUNTER_CONTROL_ADDR", default_value = DEFAULT_CONTROL_ADDR)]
    control: String,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current counters
    Show {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Add or remove vehicles in a section (e.g. `adjust reserved -1`)
    Adjust {
        section: Section,
        #[arg(allow_hyphen_values = true)]
        delta: i32,
    },
    /// Set office hours as `<start> <end>` local hours (0-23, end exclusive)
    Schedule { start: u32, end: u32 },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let request = match &args.command {
        Command::Show { .. } => ControlRequest::Show,
        Command::Adjust { section, delta } => ControlRequest::Adjust {
            section: *section,
            delta: *delta,
        },
        Command::Schedule { start, end } => ControlRequest::Schedule {
            start_hour: *start,
            end_hour: *end,
        },
    };

    let live = {
        let _stage = ui.stage("Contact counterd");
        ControlClient::new(&args.control)?.try_send(&request)?
    };
    let occupancy = match live {
        Some(occupancy) => occupancy,
        None => {
            log::info!(
                "counterd not listening on {}; using {} directly",
                args.control,
                args.db
            );
            let _stage = ui.stage("Open occupancy store");
            apply_to_store(&args.db, &request)?
        }
    };

    match args.command {
        Command::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&occupancy)?);
            } else {
                print_table(&occupancy);
            }
        }
        Command::Adjust { section, .. } => {
            println!(
                "{}: {}/{} (lot {}/{})",
                section,
                occupancy.occupied(section),
                section.capacity(),
                occupancy.reported(),
                GENERAL_CAPACITY
            );
        }
        Command::Schedule { start, end } => {
            println!(
                "office hours {:02}:00-{:02}:00; executive {}/{}",
                start,
                end,
                occupancy.occupied(Section::Executive),
                Section::Executive.capacity()
            );
        }
    }
    Ok(())
}

/// Offline path: counterd is not running, so this process is the only writer.
fn apply_to_store(db: &str, request: &ControlRequest) -> Result<Occupancy> {
    let mut store =
        SqliteOccupancyStore::open(db).with_context(|| format!("open occupancy store {}", db))?;
    let mut occupancy = store.load()?;
    let hour = chrono::Local::now().hour();
    occupancy.apply_schedule(hour);
    match request {
        ControlRequest::Show => {}
        ControlRequest::Adjust { section, delta } => {
            occupancy.adjust(*section, *delta)?;
            store.save(&occupancy)?;
        }
        ControlRequest::Schedule {
            start_hour,
            end_hour,
        } => {
            occupancy.set_schedule(AdminSchedule::new(*start_hour, *end_hour)?, hour);
            store.save(&occupancy)?;
        }
    }
    Ok(occupancy)
}

fn print_table(occupancy: &Occupancy) {
    println!("{:<12} {:>9}", "available", occupancy.available());
    println!(
        "{:<12} {:>5}/{}",
        "occupied",
        occupancy.reported(),
        GENERAL_CAPACITY
    );
    for section in Section::ALL {
        println!(
            "{:<12} {:>5}/{}",
            section.as_str(),
            occupancy.occupied(section),
            section.capacity()
        );
    }
    let schedule = occupancy.schedule();
    println!(
        "{:<12} {:02}:00-{:02}:00",
        "office hours",
        schedule.start_hour(),
        schedule.end_hour()
    );
}
