use env_logger::{Builder, Env, Target};
use log::{error, info, warn};

use gnssai_relay::{open_serial, CancelToken, FrameReader, Pipeline, RelayCfg, RelayError, Runner};

fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stdout)
        .format_timestamp_secs()
        .init();

    let cfg = load_cfg(argh::from_env());
    if let Err(e) = run(&cfg) {
        error!("{}", e);
        std::process::exit(1);
    }
    info!("Stopped");
}

fn load_cfg(args: RelayCfg) -> RelayCfg {
    let cfg = if args.use_saved {
        match RelayCfg::load_default() {
            Ok(saved) => {
                info!("Using saved configuration");
                saved
            }
            Err(e) => {
                warn!("Could not load saved configuration, using arguments: {}", e);
                args.clone()
            }
        }
    } else {
        args.clone()
    };
    if args.save_config {
        match cfg.store_default() {
            Ok(()) => info!("Configuration saved"),
            Err(e) => warn!("Could not save configuration: {}", e),
        }
    }
    cfg
}

fn run(cfg: &RelayCfg) -> Result<(), RelayError> {
    let token = CancelToken::new();
    let handler = token.clone();
    ctrlc::set_handler(move || {
        handler.cancel();
    })
    .map_err(|e| RelayError::Config(format!("Failed to set signal handler: {}", e)))?;

    let opts = cfg.relay_options();
    let port = open_serial(&cfg.serial_port, cfg.baud_rate, cfg.read_timeout())?;
    info!(
        "Reading {} at {} baud, relaying to {:?}, classifier {}",
        cfg.serial_port,
        cfg.baud_rate,
        opts.fifo_path,
        cfg.classifier
    );
    let mut runner = Runner::with_options(
        FrameReader::new(port),
        Pipeline::new(cfg.pipeline_options()),
        &opts,
    )?;
    runner.run(&token)
}
