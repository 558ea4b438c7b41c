use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use simplelog::{ColorChoice, CombinedLogger, LevelFilter, SharedLogger, TerminalMode};
use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libgain_monitor::config::Config;
use libgain_monitor::process::process;
use libgain_monitor::worker_status::WorkerStatus;

const LOG_FILE_NAME: &str = "gain_monitor.log";

fn make_template_config(path: &Path) -> Result<(), Box<dyn Error>> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

/// Terminal logging bridged with the progress bars, plus a log file when a directory is given
fn init_logging(log_dir: Option<&Path>) -> Result<MultiProgress, Box<dyn Error>> {
    let term_logger = simplelog::TermLogger::new(
        LevelFilter::Info,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![term_logger];
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;
        loggers.push(simplelog::WriteLogger::new(
            LevelFilter::Info,
            simplelog::Config::default(),
            File::create(dir.join(LOG_FILE_NAME))?,
        ));
    }

    let pb_manager = MultiProgress::new();
    LogWrapper::new(pb_manager.clone(), CombinedLogger::new(loggers)).try_init()?;
    log::set_max_level(log::LevelFilter::Info);
    Ok(pb_manager)
}

fn main() {
    // Create a cli
    let matches = Command::new("gain_monitor_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Parse the cli
    let Some(config_path) = matches.get_one::<String>("path").map(PathBuf::from) else {
        eprintln!("A configuration path is required (-p/--path)");
        return;
    };

    if let Some(("new", _)) = matches.subcommand() {
        if let Err(e) = init_logging(None) {
            eprintln!("Could not create logging: {e}");
            return;
        }
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("Could not write template config: {e}"),
        }
        return;
    }

    // Load our config
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };

    // Initialize feedback
    let pb_manager = match init_logging(Some(&config.output_path)) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Could not create logging/progress: {e}");
            return;
        }
    };
    log::info!("Config loaded from {}.", config_path.to_string_lossy());
    log::info!("Production Path: {}", config.prod_path.to_string_lossy());
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!(
        "Channel Map Path: {}",
        config.channel_map_path.to_string_lossy()
    );
    for (period, runs) in config.periods.iter() {
        log::info!("Period {period}: {}", runs.join(", "));
    }
    log::info!("Number of Workers: {}", config.n_threads);

    // Setup the progress bars, one per worker
    let style = ProgressStyle::with_template("[worker {prefix}] {bar:40} {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let bars: Vec<ProgressBar> = (0..config.n_threads.max(1))
        .map(|idx| {
            let pb = pb_manager.add(ProgressBar::new(100));
            pb.set_style(style.clone());
            pb.set_prefix(idx.to_string());
            pb
        })
        .collect();

    // Spawn the task!
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let handle = std::thread::spawn(move || process(config, tx));

    // The channel closes once the task returns
    for status in rx.iter() {
        if let Some(pb) = bars.get(status.worker_id) {
            pb.set_position((status.progress * 100.0) as u64);
            pb.set_message(format!(
                "{} {} {}",
                status.color.stage_name(),
                status.period,
                status.channel
            ));
        }
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(_) => log::info!("Successfully monitored all periods!"),
            Err(e) => log::error!("Monitoring failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join monitoring task!"),
    }

    for pb in bars {
        pb.finish();
    }

    log::info!("Done.");
}
