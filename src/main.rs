use std::{
    path::PathBuf,
    sync::{Arc, RwLock, mpsc},
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand};

use pitwall::config::AppConfig;
use pitwall::documents::SaveReason;
use pitwall::errors::PitwallError;
use pitwall::ingest::{self, ReplayEventSource, UdpEventSource};
use pitwall::saver;
use pitwall::session::store::DriverRecordStore;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest decoded telemetry events from a UDP socket
    Live {
        /// Address to listen on, overrides the configured default
        #[arg(short, long)]
        bind: Option<String>,

        /// Also record every received event to a JSON-lines capture file
        #[arg(short, long)]
        capture: Option<PathBuf>,
    },
    /// Rebuild a session from a JSON-lines capture file
    Replay {
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for the session document, overrides the configured one
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
}

fn live(
    bind: String,
    capture: Option<PathBuf>,
    config: &AppConfig,
) -> Result<(), PitwallError> {
    let store = Arc::new(RwLock::new(DriverRecordStore::new()));

    // on Ctrl-C the session reconstructed so far is saved before exiting
    let handler_store = store.clone();
    let save_directory = config.resolved_save_directory();
    let pit_wear_threshold_pct = config.pit_wear_threshold_pct;
    ctrlc::set_handler(move || {
        println!("Exiting...");
        if let Some(directory) = &save_directory {
            if let Err(e) = saver::save_session(
                &handler_store,
                directory,
                SaveReason::Shutdown,
                pit_wear_threshold_pct,
            ) {
                eprintln!("Could not save session on exit: {}", e);
            }
        }
        std::process::exit(0);
    })
    .expect("Could not set Ctrl-C handler");

    let source = UdpEventSource::bind(&bind, Duration::from_secs(config.silence_timeout_s))?;
    if let Some(capture_file) = capture {
        let (capture_tx, capture_rx) = mpsc::channel();
        thread::spawn(move || {
            ingest::write_capture(&capture_file, capture_rx)
                .expect("Error while writing capture file");
        });
        ingest::run_ingest(source, store, Some(capture_tx))
    } else {
        ingest::run_ingest(source, store, None)
    }
}

fn replay(
    input: &PathBuf,
    save: Option<PathBuf>,
    config: &AppConfig,
) -> Result<(), PitwallError> {
    ctrlc::set_handler(move || {
        println!("Exiting...");
        std::process::exit(0);
    })
    .expect("Could not set Ctrl-C handler");

    let store = Arc::new(RwLock::new(DriverRecordStore::new()));
    let source = ReplayEventSource::open(input)?;
    ingest::run_ingest(source, store.clone(), None)?;

    if let Some(directory) = save.or_else(|| config.resolved_save_directory()) {
        let path = saver::save_session(
            &store,
            &directory,
            SaveReason::EndOfCapture,
            config.pit_wear_threshold_pct,
        )?;
        println!("Session document written to {:?}", path);
    }
    Ok(())
}

fn main() {
    #[cfg(debug_assertions)]
    colog::init();

    let cli = Args::parse();
    let config = AppConfig::from_local_file().unwrap_or_default();
    match &cli.command {
        Commands::Live { bind, capture } => {
            let bind = bind.clone().unwrap_or_else(|| config.bind_addr.clone());
            live(bind, capture.clone(), &config).expect("Error while ingesting live telemetry");
        }
        Commands::Replay { input, save } => {
            replay(input, save.clone(), &config).expect("Error while replaying capture");
        }
    };
}
