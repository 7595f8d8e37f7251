use std::fs;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use anndata_portal::app::{ExportRequest, Portal, UploadRequest};
use anndata_portal::config::ConfigLoader;
use anndata_portal::domain::DatasetFormat;
use anndata_portal::error::PortalError;
use anndata_portal::output::JsonOutput;

#[derive(Parser)]
#[command(name = "anndata-portal")]
#[command(about = "Ingest scientific datasets into a canonical annotated-matrix store")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Convert an uploaded file into a canonical dataset")]
    Upload(UploadArgs),
    #[command(about = "Export a row subset of a computed result as a new dataset")]
    Export(ExportArgs),
    #[command(about = "Inspect and maintain dataset records")]
    Dataset(DatasetArgs),
}

#[derive(Args)]
struct UploadArgs {
    /// Path of the file to ingest; its filename seeds the storage name.
    file: String,

    #[arg(long)]
    format: DatasetFormat,

    #[arg(long)]
    owner: Option<String>,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    description: Option<String>,
}

#[derive(Args)]
struct ExportArgs {
    /// Process id naming a results directory under the temp root.
    pid: String,

    /// Comma-separated row indices, e.g. "2,0,0".
    #[arg(long)]
    index: String,

    #[arg(long)]
    owner: Option<String>,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    description: Option<String>,
}

#[derive(Args)]
struct DatasetArgs {
    #[command(subcommand)]
    command: DatasetCommand,
}

#[derive(Subcommand)]
enum DatasetCommand {
    #[command(about = "List dataset records")]
    List(ListArgs),
    #[command(about = "Rename or re-describe a dataset record")]
    Update(UpdateArgs),
    #[command(about = "Delete a dataset record and its backing file")]
    Delete(DeleteArgs),
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// 0 lists everything.
    #[arg(long, default_value_t = 0)]
    limit: usize,
}

#[derive(Args)]
struct UpdateArgs {
    #[arg(long)]
    id: u64,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    description: Option<String>,
}

#[derive(Args)]
struct DeleteArgs {
    #[arg(long)]
    id: u64,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(portal) = report.downcast_ref::<PortalError>() {
            return ExitCode::from(map_exit_code(portal));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PortalError) -> u8 {
    match error {
        PortalError::RecordNotFound(_) | PortalError::ResultsNotFound(_) => 2,
        PortalError::Conversion(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;
    let portal = Portal::new(config);

    match cli.command {
        Commands::Upload(args) => run_upload(args, &portal),
        Commands::Export(args) => run_export(args, &portal),
        Commands::Dataset(args) => match args.command {
            DatasetCommand::List(args) => {
                let records = portal
                    .list_datasets(args.offset, args.limit)
                    .into_diagnostic()?;
                JsonOutput::print_records(&records).into_diagnostic()?;
                Ok(())
            }
            DatasetCommand::Update(args) => {
                let record = portal
                    .update_dataset(args.id, args.name.as_deref(), args.description.as_deref())
                    .into_diagnostic()?;
                JsonOutput::print_record(&record).into_diagnostic()?;
                Ok(())
            }
            DatasetCommand::Delete(args) => {
                let record = portal.delete_dataset(args.id).into_diagnostic()?;
                JsonOutput::print_record(&record).into_diagnostic()?;
                Ok(())
            }
        },
    }
}

fn run_upload(args: UploadArgs, portal: &Portal) -> miette::Result<()> {
    let bytes = fs::read(&args.file).into_diagnostic()?;
    let filename = std::path::Path::new(&args.file)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| miette::Report::msg("upload path has no usable filename"))?
        .to_string();

    let outcome = portal
        .upload(UploadRequest {
            filename,
            bytes,
            format: args.format,
            owner: args.owner,
            name: args.name,
            description: args.description,
        })
        .into_diagnostic()?;
    JsonOutput::print_upload(&outcome).into_diagnostic()?;
    if outcome.status {
        Ok(())
    } else {
        // conversion failures are reported in the outcome body; still exit
        // non-zero so scripts notice
        Err(miette::Report::msg(outcome.info))
    }
}

fn run_export(args: ExportArgs, portal: &Portal) -> miette::Result<()> {
    let outcome = portal
        .export(ExportRequest {
            pid: args.pid,
            index: args.index,
            owner: args.owner,
            name: args.name,
            description: args.description,
        })
        .into_diagnostic()?;
    JsonOutput::print_export(&outcome).into_diagnostic()?;
    Ok(())
}
