use clap::{ Arg, App, AppSettings, ArgMatches, SubCommand };

use std::error::Error;
use std::path::Path;
use std::process;
use std::sync::mpsc::{ Receiver, RecvTimeoutError };
use std::sync::Arc;
use std::time::Duration;

use lpr_capture::{ CaptureSession, Completion, Config, DetectionInput, DetectionWorker, DisplayState, LogStore, LprError, LprErrorKind, PlateDetector };


fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = App::new("lpr-capture")
                    .version("0.1.0")
                    .author("kingrong")
                    .about("Reads license plates from images or a camera and logs them")
                    .setting(AppSettings::SubcommandRequiredElseHelp)
                    .arg(Arg::with_name("config")
                        .long("config")
                        .short("c")
                        .takes_value(true)
                        .global(true)
                        .help("TOML config file"))
                    .subcommand(SubCommand::with_name("detect")
                        .about("detect the plate in an image file")
                        .arg(Arg::with_name("INPUT")
                            .help("image file with license plate")
                            .required(true)
                            .index(1))
                        .arg(output_arg())
                        .arg(show_arg()))
                    .subcommand(SubCommand::with_name("camera")
                        .about("capture a still from the camera and detect the plate in it")
                        .arg(Arg::with_name("device")
                            .long("device")
                            .short("d")
                            .takes_value(true)
                            .help("camera device, overrides the config"))
                        .arg(Arg::with_name("wait")
                            .long("wait")
                            .takes_value(true)
                            .default_value("5")
                            .help("seconds to wait for the first frame"))
                        .arg(output_arg())
                        .arg(show_arg()))
                    .subcommand(SubCommand::with_name("logs")
                        .about("list logged plates, newest first"))
                    .get_matches();

    let config_path = matches.value_of("config")
        .or_else(|| matches.subcommand().1.and_then(|sub| sub.value_of("config")));
    let mut config = Config::load(config_path.map(Path::new))?;
    let log_store = Arc::new(LogStore::new(&config.log_path));

    match matches.subcommand() {
        ("detect", Some(sub)) => {
            let input = DetectionInput::Path(sub.value_of("INPUT").ok_or("image is required")?.into());
            let display = detect(&config, &log_store, input)?;
            show_result(&display, sub)?;
        }
        ("camera", Some(sub)) => {
            if let Some(device) = sub.value_of("device") {
                config.camera.device = device.to_string();
            }
            let wait = sub.value_of("wait").unwrap_or("5").parse::<u64>()?;
            let still = match capture_still(&config, Duration::from_secs(wait)) {
                Ok(still) => still,
                Err(e) => {
                    log::error!("{}", e);
                    match e.kind() {
                        LprErrorKind::DeviceUnavailable(_) => eprintln!("Error: Could not access camera."),
                        LprErrorKind::NoFrameAvailable => eprintln!("No frame to capture."),
                        _ => eprintln!("Error: {}", e),
                    }
                    process::exit(1);
                }
            };
            let display = detect(&config, &log_store, DetectionInput::Path(still))?;
            show_result(&display, sub)?;
        }
        ("logs", _) => {
            let records = log_store.recent()?;
            if records.is_empty() {
                println!("No valid detections logged yet.");
            }
            for record in records {
                println!("{} > {}", record.timestamp, record.plate_text);
            }
        }
        _ => unreachable!("clap requires a subcommand"),
    }

    Ok(())
}

fn output_arg() -> Arg<'static, 'static> {
    Arg::with_name("output")
        .long("output")
        .short("o")
        .takes_value(true)
        .help("write the annotated image here")
}

fn show_arg() -> Arg<'static, 'static> {
    Arg::with_name("show")
        .long("show")
        .help("display the annotated image")
}

/// Hand `input` to a background detection and wait for it the way a UI loop would.
fn detect(config: &Config, log_store: &Arc<LogStore>, input: DetectionInput) -> Result<DisplayState, Box<dyn Error>> {
    let detector = PlateDetector::shared(config)?;
    let (worker, completions) = DetectionWorker::new(detector, Arc::clone(log_store), config.detection.timeout());
    worker.submit(input);
    drop(worker);

    let mut display = DisplayState::default();
    wait_for_completions(&completions, &mut display);
    println!("{}", display.status());
    Ok(display)
}

fn wait_for_completions(completions: &Receiver<Completion>, display: &mut DisplayState) {
    loop {
        match completions.recv_timeout(Duration::from_millis(50)) {
            Ok(completion) => display.apply(completion),
            Err(RecvTimeoutError::Timeout) => continue,
            // every request has reported back
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// start-camera, capture-still, stop-camera. The still is written to `capture_path`.
fn capture_still(config: &Config, wait: Duration) -> Result<std::path::PathBuf, LprError> {
    let (notify_tx, notify_rx) = std::sync::mpsc::sync_channel(1);
    let mut session = CaptureSession::new(config.camera.clone()).with_notifier(notify_tx);
    session.start()?;
    // no frame in time falls through to capture_still, which reports it
    let _ = notify_rx.recv_timeout(wait);
    let still = session.capture_still();
    session.stop();

    let still = still?;
    still.save(&config.capture_path).map_err(LprError::image_encode)?;
    log::info!("captured frame written to {}", config.capture_path.display());
    Ok(config.capture_path.clone())
}

fn show_result(display: &DisplayState, sub: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let Some(img) = display.image() else {
        return Ok(());
    };
    if let Some(output) = sub.value_of("output") {
        img.save(output)?;
    }
    if sub.is_present("show") {
        show(img);
    }
    Ok(())
}

#[cfg(feature = "display-window")]
fn show(img: &lpr_capture::Frame) {
    let rgba = image::DynamicImage::ImageRgb8(img.clone()).to_rgba8();
    imageproc::window::display_image("res", &rgba, 700, 700);
}

#[cfg(not(feature = "display-window"))]
fn show(_img: &lpr_capture::Frame) {
    log::warn!("built without the display-window feature, nothing to show");
}
