use anyhow::Context;
use clap::{Parser, Subcommand};
use dicomstore_core::codec::{AcceptHeader, TransferSyntaxRequest};
use dicomstore_core::constants::{DEFAULT_DATA_DIR, DEFAULT_MAX_PAYLOAD_BYTES};
use dicomstore_core::retrieve::{RetrieveInstanceRequest, RetrieveRenderedRequest};
use dicomstore_core::update::{ChangeDataset, UpdateOperationInput};
use dicomstore_core::{CoreConfig, FrameSizePolicy, Services};
use dicomstore_types::{DicomUid, InstanceIdentifier, OperationId, PartitionKey};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dicomstore")]
#[command(about = "dicomstore imaging store CLI")]
struct Cli {
    /// Data directory holding blobs, index and operation records
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Data partition
    #[arg(long, global = true, default_value_t = 1)]
    partition: i64,

    /// Largest payload retrieved or rendered, in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_PAYLOAD_BYTES)]
    max_payload_bytes: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new instance from a file
    Store {
        /// Encoded instance
        file: PathBuf,
    },
    /// Write a whole instance to a file
    Retrieve {
        study: String,
        series: String,
        sop: String,
        /// Output file
        #[arg(long, short)]
        out: PathBuf,
        /// Target transfer syntax UID; `*` keeps the stored encoding
        #[arg(long, default_value = "*")]
        transfer_syntax: String,
        /// Read the version from before the first update
        #[arg(long)]
        original: bool,
    },
    /// Write one frame to a file
    Frame {
        study: String,
        series: String,
        sop: String,
        /// 1-based frame number
        frame: u32,
        /// Output file
        #[arg(long, short)]
        out: PathBuf,
        /// Target transfer syntax UID; `*` keeps the stored encoding
        #[arg(long, default_value = "*")]
        transfer_syntax: String,
        /// Read the version from before the first update
        #[arg(long)]
        original: bool,
    },
    /// Render one frame of the current version
    Render {
        study: String,
        series: String,
        sop: String,
        /// Output file
        #[arg(long, short)]
        out: PathBuf,
        /// 1-based frame number
        #[arg(long)]
        frame: Option<u32>,
        /// Accepted media types, as in an HTTP Accept header
        #[arg(long, default_value = "*/*")]
        accept: String,
    },
    /// Print decoded metadata of an instance, or of a whole study when series and SOP are omitted
    Metadata {
        study: String,
        series: Option<String>,
        sop: Option<String>,
        /// Read the version from before the first update
        #[arg(long)]
        original: bool,
    },
    /// Submit a bulk update and run it to completion
    Update {
        /// Change dataset as a JSON object, e.g. '{"PatientName":"Doe^Jane"}'
        #[arg(long)]
        changes: String,
        /// Studies to update
        #[arg(required = true)]
        studies: Vec<String>,
    },
    /// Run every unfinished update operation
    Resume,
    /// Print the status of an update operation
    Status {
        /// Operation id
        id: String,
    },
    /// Request cancellation of an update operation
    Cancel {
        /// Operation id
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dicomstore=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'dicomstore --help' for commands");
        return Ok(());
    };

    let cfg = CoreConfig::new(
        cli.data_dir,
        cli.max_payload_bytes,
        FrameSizePolicy::default(),
        Duration::from_secs(1),
        1,
    )?;
    let services = Services::open(&cfg)?;
    let partition = PartitionKey::new(cli.partition)?;

    match command {
        Commands::Store { file } => {
            let content = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let metadata = services.store.store(partition, &content).await?;
            println!("Stored {}", metadata.identifier);
        }
        Commands::Retrieve {
            study,
            series,
            sop,
            out,
            transfer_syntax,
            original,
        } => {
            let response = services
                .retrieve
                .retrieve_instance(&RetrieveInstanceRequest {
                    instance: InstanceIdentifier::parse(partition, &study, &series, &sop)?,
                    transfer_syntax: TransferSyntaxRequest::parse(&transfer_syntax),
                    want_original: original,
                })
                .await?;
            write_output(&out, &response.content)?;
            println!(
                "Wrote {} ({}) to {}",
                response.identifier,
                response.transfer_syntax_uid,
                out.display()
            );
        }
        Commands::Frame {
            study,
            series,
            sop,
            frame,
            out,
            transfer_syntax,
            original,
        } => {
            let instance = InstanceIdentifier::parse(partition, &study, &series, &sop)?;
            let content = services
                .retrieve
                .retrieve_frame(
                    &instance,
                    frame,
                    TransferSyntaxRequest::parse(&transfer_syntax),
                    original,
                )
                .await?;
            write_output(&out, &content)?;
            println!("Wrote frame {} of {} to {}", frame, instance, out.display());
        }
        Commands::Render {
            study,
            series,
            sop,
            out,
            frame,
            accept,
        } => {
            let response = services
                .retrieve
                .retrieve_rendered(&RetrieveRenderedRequest {
                    instance: InstanceIdentifier::parse(partition, &study, &series, &sop)?,
                    accept: AcceptHeader::parse_list(&accept),
                    frame,
                    quality: None,
                })
                .await?;
            write_output(&out, &response.content)?;
            println!(
                "Rendered {} as {} to {}",
                response.identifier,
                response.media_type,
                out.display()
            );
        }
        Commands::Metadata {
            study,
            series,
            sop,
            original,
        } => {
            let metadata = match (series, sop) {
                (Some(series), Some(sop)) => {
                    let instance = InstanceIdentifier::parse(partition, &study, &series, &sop)?;
                    services
                        .retrieve
                        .retrieve_instance_metadata(&instance, original)
                        .await?
                }
                (None, None) => serde_json::Value::Array(
                    services
                        .retrieve
                        .retrieve_study_metadata(partition, &DicomUid::new(&study)?, original)
                        .await?,
                ),
                _ => anyhow::bail!("series and SOP instance UIDs must be given together"),
            };
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Update { changes, studies } => {
            let studies = studies
                .iter()
                .map(DicomUid::new)
                .collect::<Result<Vec<_>, _>>()?;
            let input = UpdateOperationInput::new(
                partition,
                studies,
                ChangeDataset::from_json_str(&changes)?,
            )?;
            let id = services.operations.submit_update(input).await?;
            println!("Submitted operation {}", id);

            let job = services.orchestrator.run(id).await?;
            print_operation(&job);
        }
        Commands::Resume => {
            let count = services.worker().run_pending().await?;
            println!("Ran {} unfinished operation(s)", count);
        }
        Commands::Status { id } => {
            let job = services
                .operations
                .get_operation_status(OperationId::parse(&id)?)
                .await?;
            print_operation(&job);
        }
        Commands::Cancel { id } => {
            let job = services
                .operations
                .cancel_operation(OperationId::parse(&id)?)
                .await?;
            print_operation(&job);
        }
    }

    Ok(())
}

fn write_output(path: &Path, content: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

fn print_operation(job: &dicomstore_core::update::UpdateJob) {
    println!("Operation {}: {}", job.operation_id, job.status.as_str());
    if let Some(error) = &job.last_error {
        println!("  last error (attempt {}): {}", job.attempts, error);
    }
    for study in &job.studies {
        println!(
            "  {} {} (updated {}, unchanged {}, failed {})",
            study.study_instance_uid,
            study.state.as_str(),
            study.instances_updated,
            study.instances_unchanged,
            study.instances_failed
        );
        if let Some(error) = &study.error {
            println!("    {}", error);
        }
    }
}
