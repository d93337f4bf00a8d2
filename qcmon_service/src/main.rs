//! `qcmon` - command line front end for stream resolution and QC requests.

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use qcmon_service::alert::silent::{silent_stations, stale_streams};
use qcmon_service::analysis::patterns::{self, StreamSelection};
use qcmon_service::config::{self, Config};
use qcmon_service::db::{self, MetadataGateway};
use qcmon_service::dev_mode::ReplayFetcher;
use qcmon_service::export;
use qcmon_service::ingest::fdsnws::FdsnStationClient;
use qcmon_service::ingest::scqueryqc::{MetricFetcher, ScqueryqcFetcher};
use qcmon_service::logging::{self, DataSource};
use qcmon_service::model::{QcError, QueryWindow, display_location};
use qcmon_service::session::{self, PreparedQuery, QcOutcome, QcRequest, QcSession, RequestKind};
use qcmon_service::stations::station_label;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "qcmon")]
#[command(about = "Resolve SeisComP streams and query waveform quality parameters")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Where inventory and station configuration come from
    #[arg(long, global = true, value_enum, default_value_t = Source::Db)]
    source: Source,

    /// Use captured scqueryqc XML instead of running the tool
    #[arg(long, global = true, value_name = "FILE")]
    replay: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Source {
    /// SeisComP Postgres database
    Db,
    /// FDSN station web service (no station configuration)
    Fdsnws,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List network codes
    Networks,
    /// List stations of networks with their default stream
    Stations {
        #[arg(short, long, required = true, num_args = 1.., value_delimiter = ',')]
        networks: Vec<String>,
    },
    /// List location and channel codes of stations
    Inventory {
        #[command(flatten)]
        stations: StationArgs,
    },
    /// Print the stream patterns a selection resolves to
    Streams {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Fetch per-stream QC time series
    Series {
        #[command(flatten)]
        query: QueryArgs,
        /// Write every sample as JSON
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,
        /// Report streams whose newest sample is older than this
        #[arg(long, value_name = "MINUTES")]
        stale_after: Option<u64>,
    },
    /// Fetch per-station averages, including stations that reported nothing
    Averages {
        #[command(flatten)]
        query: QueryArgs,
        /// Write the table as CSV
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct StationArgs {
    #[arg(short, long, required = true, num_args = 1.., value_delimiter = ',')]
    networks: Vec<String>,
    #[arg(short, long, required = true, num_args = 1.., value_delimiter = ',')]
    stations: Vec<String>,
}

#[derive(Args, Debug)]
struct SelectionArgs {
    #[command(flatten)]
    stations: StationArgs,
    /// Location codes, `--locations=--` for the empty one; omitted means
    /// each station's default
    #[arg(short, long, num_args = 1.., value_delimiter = ',', allow_hyphen_values = true)]
    locations: Vec<String>,
    /// Channel codes; omitted means each station's default
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    channels: Vec<String>,
}

impl SelectionArgs {
    fn selection(&self) -> StreamSelection {
        StreamSelection::from_lists(
            self.stations.networks.as_slice(),
            self.stations.stations.as_slice(),
            self.locations.as_slice(),
            self.channels.as_slice(),
        )
    }
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[command(flatten)]
    selection: SelectionArgs,
    /// QC parameter names, e.g. latency,"gaps count"
    #[arg(short, long, required = true, num_args = 1.., value_delimiter = ',')]
    parameters: Vec<String>,
    /// Window start, `YYYY-MM-DD HH:MM:SS`
    #[arg(long)]
    start: String,
    /// Window end, `YYYY-MM-DD HH:MM:SS`
    #[arg(long)]
    end: String,
}

impl QueryArgs {
    fn request(&self, kind: RequestKind) -> Result<QcRequest, QcError> {
        Ok(QcRequest {
            selection: self.selection.selection(),
            window: QueryWindow::parse(&self.start, &self.end)?,
            parameters: self.parameters.iter().cloned().collect(),
            kind,
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_user_correctable() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn open_gateway(source: Source, config: &Config) -> Result<Box<dyn MetadataGateway>, QcError> {
    let gateway: Box<dyn MetadataGateway> = match source {
        Source::Db => Box::new(db::connect(&config.database.url)?),
        Source::Fdsnws => Box::new(FdsnStationClient::new(&config.fdsnws)?),
    };
    Ok(gateway)
}

fn run(cli: Cli) -> Result<(), QcError> {
    let config = config::load_config(&cli.config)?;
    logging::init_logger(
        config.logging.log_level()?,
        config.logging.file.as_deref(),
        config.logging.timestamps,
    );

    let mut gateway = open_gateway(cli.source, &config).inspect_err(|e| {
        logging::log_gateway_failure(DataSource::System, "connect", e);
    })?;
    let fetcher: Arc<dyn MetricFetcher> = match &cli.replay {
        Some(path) => Arc::new(ReplayFetcher::from_file(path)),
        None => Arc::new(ScqueryqcFetcher::new()),
    };

    match cli.command {
        Command::Networks => {
            for code in gateway.network_codes()? {
                println!("{}", code);
            }
        }
        Command::Stations { networks } => {
            let networks: BTreeSet<String> = networks.into_iter().collect();
            let defaults = session::load_defaults(gateway.as_mut());
            for station in gateway.station_codes(&networks)? {
                println!("{}\t{}", station.network, station_label(&station, &defaults));
            }
        }
        Command::Inventory { stations } => {
            let networks: BTreeSet<String> = stations.networks.into_iter().collect();
            let stations: BTreeSet<String> = stations.stations.into_iter().collect();
            let inventory = gateway.stream_inventory(&networks, &stations)?;
            let locations: Vec<&str> = inventory.locations.iter().map(|l| display_location(l)).collect();
            println!("Locations: {}", locations.join(" "));
            println!("Channels:  {}", inventory.channels.iter().cloned().collect::<Vec<_>>().join(" "));
        }
        Command::Streams { selection } => {
            let selection = selection.selection();
            let defaults = session::load_defaults(gateway.as_mut());
            let streams = patterns::generate(&selection, &defaults);
            if streams.is_empty() {
                return Err(QcError::EmptySelection("selection resolves to no streams".to_string()));
            }
            for stream in &streams {
                println!("{}", stream.pattern());
            }
        }
        Command::Series { query, json, stale_after } => {
            let prepared = session::prepare(gateway.as_mut(), &query.request(RequestKind::TimeSeries)?, &config)?;
            let outcome = execute(fetcher, prepared)?;
            let dataset = outcome.dataset();

            for (stream, params) in dataset.iter() {
                for (parameter, series) in params {
                    let last = series.sorted_by_time().last().map(|s| s.value);
                    println!(
                        "{}\t{}\t{} samples\tlast {}",
                        stream,
                        parameter,
                        series.len(),
                        last.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "N/A".to_string())
                    );
                }
            }
            if let Some(minutes) = stale_after {
                for (stream, newest) in stale_streams(dataset, minutes, Utc::now()) {
                    println!("STALE\t{}\tnewest sample {}", stream, newest.to_rfc3339());
                }
            }
            if let Some(path) = json {
                export::save_dataset_json(dataset, &path)?;
                logging::info(DataSource::System, None, &format!("wrote {}", path.display()));
            }
        }
        Command::Averages { query, csv } => {
            let prepared = session::prepare(
                gateway.as_mut(),
                &query.request(RequestKind::StationAverages)?,
                &config,
            )?;
            let QcOutcome::Averages { table, .. } = execute(fetcher, prepared)? else {
                return Err(QcError::MalformedData("averages request returned a time series".to_string()));
            };

            export::write_averages_csv(&table, std::io::stdout().lock())?;
            let silent = silent_stations(&table);
            if !silent.is_empty() {
                let names: Vec<String> = silent.iter().map(ToString::to_string).collect();
                eprintln!("Silent stations: {}", names.join(", "));
            }
            if let Some(path) = csv {
                export::save_averages_csv(&table, &path)?;
                logging::info(DataSource::System, None, &format!("wrote {}", path.display()));
            }
        }
    }

    Ok(())
}

/// Runs a prepared request on a fresh runtime, printing progress to stderr.
/// Ctrl-C cancels the request.
fn execute(fetcher: Arc<dyn MetricFetcher>, prepared: PreparedQuery) -> Result<QcOutcome, QcError> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let session = QcSession::new(fetcher);
        let handle = session.start(prepared)?;

        let mut progress = handle.progress();
        let reporter = tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let fraction = *progress.borrow_and_update();
                eprint!("\rProgress: {:>3.0}%", fraction * 100.0);
                let _ = std::io::stderr().flush();
            }
            eprintln!();
        });

        let abort = handle.abort_handle();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                abort.abort();
            }
        });

        let result = handle.wait().await;
        interrupt.abort();
        let _ = reporter.await;
        result
    })
}
