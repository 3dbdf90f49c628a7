use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use smartmeter_rs::config::{decryptor_from_env, DEFAULT_CONFIG_FILE};
use smartmeter_rs::logging::log_error;
use smartmeter_rs::util::hex::{parse_hex_lenient, pretty_hex};
use smartmeter_rs::{
    decode_window, init_logger, init_logger_to_file, log_info, simulate_window, AcquisitionLoop,
    Config, DiscardSink, JsonLinesSink, RawWindow, Reading, ReadingSink, SecurityControl,
    SerialLink,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "smartmeter")]
#[command(about = "Reads the EVN smart meter customer interface")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read from the serial port until a fatal error occurs (default)
    Run,
    /// Decode one captured window given as hex (spaces, `:` and `-` allowed)
    Decode {
        hex: String,
        /// Also print an offset/ASCII dump of the window
        #[arg(long)]
        dump: bool,
    },
    /// Print an authenticated window a meter could send for a reading
    Simulate {
        /// Reading as JSON, defaults to an empty reading
        #[arg(short, long)]
        reading: Option<String>,
        #[arg(short, long, default_value = "1")]
        frame_counter: u32,
        /// Leave out the GCM tag (security control 0x20, as EVN meters send)
        #[arg(long)]
        no_tag: bool,
    },
}

/// System title of the simulated meter.
const SIMULATED_TITLE: [u8; 8] = *b"KFMg\x50\x00\x00\x09";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&cli.config).await,
        Commands::Decode { hex, dump } => decode(&hex, dump),
        Commands::Simulate {
            reading,
            frame_counter,
            no_tag,
        } => simulate(reading.as_deref(), frame_counter, !no_tag),
    };

    if let Err(err) = result {
        log_error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    match &config.log_file {
        Some(path) => init_logger_to_file(path)?,
        None => init_logger(),
    }

    let decryptor = decryptor_from_env(config.require_authentication)?;
    let link = SerialLink::open(config.serial_config())?;
    log_info(&format!(
        "Listening on {} at {} baud",
        config.port, config.baudrate
    ));

    if config.persist {
        let sink = JsonLinesSink::open(&config.sink_path)
            .await
            .with_context(|| format!("opening {}", config.sink_path.display()))?;
        log_info(&format!("Storing readings in {}", sink.path().display()));
        acquire(link, sink, decryptor, &config).await
    } else {
        acquire(link, DiscardSink::default(), decryptor, &config).await
    }
}

async fn acquire<S: ReadingSink>(
    link: SerialLink,
    sink: S,
    decryptor: smartmeter_rs::Decryptor,
    config: &Config,
) -> anyhow::Result<()> {
    let mut acquisition = AcquisitionLoop::new(link, sink, decryptor, config.loop_settings());
    let err = acquisition.run().await;
    Err(err.into())
}

fn decode(hex: &str, dump: bool) -> anyhow::Result<()> {
    init_logger();
    let window = RawWindow::from(parse_hex_lenient(hex)?);
    if dump {
        println!("{}", pretty_hex(window.as_bytes(), 16));
    }
    let decryptor = decryptor_from_env(false)?;
    match decode_window(&window, &decryptor)? {
        Some(reading) => {
            println!("{reading}");
            println!("{}", serde_json::to_string_pretty(&reading)?);
            Ok(())
        }
        None => bail!("the APDU is not a data-notification"),
    }
}

fn simulate(reading: Option<&str>, frame_counter: u32, authenticated: bool) -> anyhow::Result<()> {
    init_logger();
    let reading: Reading = match reading {
        Some(json) => serde_json::from_str(json).context("parsing --reading")?,
        None => Reading::default(),
    };
    let mut control = SecurityControl::ENCRYPTED;
    if authenticated {
        control |= SecurityControl::AUTHENTICATED;
    }
    let decryptor = decryptor_from_env(false)?;
    let window = simulate_window(&reading, &decryptor, &SIMULATED_TITLE, frame_counter, control)?;
    println!("{}", window.to_hex());
    Ok(())
}
