//! counterd - vehicle line-crossing counter daemon
//!
//! This daemon:
//! 1. Loads configuration (COUNTER_CONFIG file + COUNTER_* overrides)
//! 2. Opens the video source (fatal if it cannot be opened)
//! 3. Starts the occupancy counter service on the sqlite store and the
//!    loopback control socket the `occupancy` tool talks to
//! 4. Runs the counting pipeline on a worker thread, feeding crossings to the counters
//! 5. Ticks the administrative schedule every minute and logs health every 5 seconds
//! 6. On Ctrl-C or end of stream, persists the counters and exits
//!    (non-zero when the stream failed)

use anyhow::{anyhow, Context, Result};
use chrono::Timelike;
use clap::Parser;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossing_counter::config::{CounterConfig, DetectorSettings};
use crossing_counter::control::ControlServer;
use crossing_counter::detect::{BackendRegistry, CpuBackend};
use crossing_counter::ingest::{FrameSampler, StreamEnd, VideoSource};
use crossing_counter::occupancy::{CounterService, Section, SqliteOccupancyStore, GENERAL_CAPACITY};
use crossing_counter::pipeline::CountingPipeline;
use crossing_counter::sink::{FanOut, JsonLinesSink, SinkWorker, ThreadedSink};
use crossing_counter::tracker::CrossingTracker;

#[path = "../ui.rs"]
mod ui;

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const SCHEDULE_TICK: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "counterd", about = "Count vehicles crossing the entry and exit lines")]
struct Args {
    /// Video source (path, stream URI or stub://); overrides the config file
    #[arg(long, value_name = "URI")]
    source: Option<String>,

    /// Also write crossing events as JSON lines to this file ("-" for stdout)
    #[arg(long, value_name = "PATH")]
    events: Option<PathBuf>,

    /// Print the available detector backends and exit
    #[arg(long)]
    list_detectors: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = {
        let _stage = ui.stage("Load configuration");
        CounterConfig::load()?
    };
    if let Some(source) = args.source {
        cfg.source.uri = source;
    }

    if args.list_detectors {
        for name in detector_registry(&cfg.detector)?.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let pipeline = {
        let _stage = ui.stage("Open video source");
        let source = VideoSource::open(&cfg.source.uri)?;
        let sampler = FrameSampler::new(source, cfg.source.frame_interval, cfg.source.resize_width)?;
        let tracker = CrossingTracker::new(cfg.counting_lines()?, &cfg.tracker)?;
        let detector = detector_registry(&cfg.detector)?.take(&cfg.detector.backend)?;
        CountingPipeline::new(sampler, detector, tracker, cfg.detector.confidence)?
    };

    let counter = {
        let _stage = ui.stage("Load occupancy");
        let store = SqliteOccupancyStore::open(&cfg.db_path)
            .with_context(|| format!("open occupancy store {}", cfg.db_path))?;
        CounterService::spawn(store, local_hour())?
    };

    let control = ControlServer::new(&cfg.control_addr, counter.inbox()).spawn()?;

    // File and stdout writers run on their own threads so the worker never waits on them.
    let mut writers: Vec<SinkWorker> = Vec::new();
    let mut sink = FanOut::new().with(counter.inbox());
    if let Some(path) = &args.events {
        let (queued, worker) =
            ThreadedSink::spawn("events", JsonLinesSink::new(open_events_output(path)?))?;
        sink = sink.with(queued);
        writers.push(worker);
    }
    #[cfg(feature = "sink-mqtt")]
    if let Some(mqtt) = &cfg.sinks.mqtt {
        let mqtt_cfg = crossing_counter::sink::MqttSinkConfig {
            host: mqtt.host.clone(),
            port: mqtt.port,
            topic_prefix: mqtt.topic_prefix.clone(),
            ..Default::default()
        };
        sink = sink.with(crossing_counter::sink::MqttSink::connect(&mqtt_cfg)?);
    }
    #[cfg(not(feature = "sink-mqtt"))]
    if cfg.sinks.mqtt.is_some() {
        log::warn!("mqtt sink configured but counterd was built without the sink-mqtt feature");
    }
    if let Some(path) = &cfg.sinks.jsonl_path {
        let (queued, worker) =
            ThreadedSink::spawn("jsonl", JsonLinesSink::new(open_events_output(path)?))?;
        sink = sink.with(queued);
        writers.push(worker);
    }

    let handle = pipeline.spawn(sink)?;
    let stop = handle.stop_signal();
    ctrlc::set_handler(move || {
        log::info!("stop requested");
        stop.stop();
    })
    .context("install Ctrl-C handler")?;

    log::info!("counterd running. counters in {}", cfg.db_path);
    let live = ui.live("Counting");
    let mut last_health = Instant::now();
    let mut last_tick = Instant::now();

    while !handle.is_finished() {
        std::thread::sleep(Duration::from_millis(200));
        let progress = handle.progress();
        live.update(format!(
            "frames {} | entered {} | exited {}",
            progress.frames_read(),
            progress.entered(),
            progress.exited()
        ));

        if last_tick.elapsed() >= SCHEDULE_TICK {
            if let Err(e) = counter.tick(local_hour()) {
                log::warn!("schedule tick failed: {:#}", e);
            }
            last_tick = Instant::now();
        }

        if last_health.elapsed() >= HEALTH_INTERVAL {
            match counter.snapshot() {
                Ok(occ) => log::info!(
                    "health: frames={} sampled={} entered={} exited={} occupied={}/{} executive={} available={}",
                    progress.frames_read(),
                    progress.frames_sampled(),
                    progress.entered(),
                    progress.exited(),
                    occ.reported(),
                    GENERAL_CAPACITY,
                    occ.occupied(Section::Executive),
                    occ.available()
                ),
                Err(e) => log::warn!("occupancy snapshot failed: {:#}", e),
            }
            last_health = Instant::now();
        }
    }

    // Joining the worker drops its sinks, which lets the writer threads drain.
    let outcome = handle.join();
    for writer in writers {
        if let Err(e) = writer.join() {
            log::warn!("event writer: {:#}", e);
        }
    }
    if let Err(e) = control.stop() {
        log::warn!("control socket: {:#}", e);
    }
    // Persist counters even when the run aborted.
    let occupancy = counter.shutdown()?;
    let outcome = outcome?;

    live.finish(format!(
        "✔ {} entered, {} exited; lot at {}/{}",
        outcome.stats.entered,
        outcome.stats.exited,
        occupancy.reported(),
        GENERAL_CAPACITY
    ));

    match outcome.end {
        StreamEnd::Failed(reason) => Err(anyhow!("video stream failed: {}", reason)),
        StreamEnd::Exhausted | StreamEnd::Stopped => Ok(()),
    }
}

fn detector_registry(settings: &DetectorSettings) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(CpuBackend::default());
    #[cfg(feature = "backend-tract")]
    if settings.backend == "tract" {
        let path = settings
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("the tract detector requires a model_path"))?;
        let mut backend = crossing_counter::detect::TractBackend::new(path, settings.input_size)?;
        if let Some(classes) = &settings.classes {
            backend = backend.with_classes(classes.clone());
        }
        registry.register(backend);
    }
    #[cfg(not(feature = "backend-tract"))]
    if settings.backend == "tract" {
        return Err(anyhow!("counterd was built without the backend-tract feature"));
    }
    log::debug!("detector backends: {}", registry.list().join(", "));
    Ok(registry)
}

fn open_events_output(path: &Path) -> Result<Box<dyn Write + Send>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(std::io::stdout()));
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open events file {}", path.display()))?;
    Ok(Box::new(file))
}

fn local_hour() -> u32 {
    chrono::Local::now().hour()
}
