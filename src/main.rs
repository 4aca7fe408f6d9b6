use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use metaplane::writenode::DdService;
use metaplane::{
    CollectionSchema, ControlPlaneConfig, DataType, FieldSchema, FileKv, InMemoryMsgStream,
    KvStore, MasterService, MsgStream, RequestContext, Status,
};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "metaplane")]
#[command(about = "Timestamp-ordered metadata control plane")]
struct Cli {
    /// Directory holding the metadata store
    #[arg(long, default_value = "./metaplane-data")]
    data_dir: PathBuf,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    CreateCollection {
        #[arg(long)]
        name: String,
        /// `name:type[:pk][:key=value...]`, e.g. `embedding:vector_float:dim=128`
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    DropCollection {
        #[arg(long)]
        name: String,
    },
    DescribeCollection {
        #[arg(long)]
        name: String,
    },
    ShowCollections,
    CreatePartition {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        tag: String,
    },
    DropPartition {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        tag: String,
    },
    ShowPartitions {
        #[arg(long)]
        collection: String,
    },
    AllocTs {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    AllocId {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("metaplane=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ControlPlaneConfig::from_file(path)?,
        None => ControlPlaneConfig::default(),
    };

    let kv: Arc<dyn KvStore> = Arc::new(
        FileKv::open(&cli.data_dir)
            .with_context(|| format!("cannot open store at {}", cli.data_dir.display()))?,
    );
    let stream = Arc::new(InMemoryMsgStream::new(config.master.dd_channel.clone()));

    let (dd_service, mut dd_rx) =
        DdService::start(&config.write_node, kv.as_ref(), stream.clone()).await?;
    let dd_task = dd_service.spawn(CancellationToken::new());

    let service = MasterService::start(config.master.clone(), kv.clone(), stream.clone()).await?;
    let ctx = RequestContext::new();
    let (status, response) = run_command(&service, &ctx, cli.command).await?;
    service.shutdown().await?;

    stream.close();
    let mut dd_msgs = Vec::new();
    while let Some(msg) = dd_rx.recv().await {
        dd_msgs.push(msg);
    }
    let node = dd_task.await.context("dd service panicked")??;

    let report = json!({
        "response": response,
        "dd": dd_msgs,
        "dd_stats": node.metrics().snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !status.is_success() {
        bail!("{:?}: {}", status.error_code, status.reason);
    }
    Ok(())
}

async fn run_command(
    service: &MasterService,
    ctx: &RequestContext,
    command: Command,
) -> Result<(Status, Value)> {
    let outcome = match command {
        Command::CreateCollection {
            name,
            fields,
            description,
        } => {
            let fields = fields
                .iter()
                .map(|spec| parse_field(spec))
                .collect::<Result<Vec<_>>>()?;
            let schema = CollectionSchema::new(name, fields).description(description);
            let status = service.create_collection(ctx, schema).await;
            (status.clone(), serde_json::to_value(status)?)
        }
        Command::DropCollection { name } => {
            let status = service.drop_collection(ctx, &name).await;
            (status.clone(), serde_json::to_value(status)?)
        }
        Command::DescribeCollection { name } => {
            let response = service.describe_collection(ctx, &name).await;
            (response.status.clone(), serde_json::to_value(response)?)
        }
        Command::ShowCollections => {
            let response = service.show_collections(ctx).await;
            (response.status.clone(), serde_json::to_value(response)?)
        }
        Command::CreatePartition { collection, tag } => {
            let status = service.create_partition(ctx, &collection, &tag).await;
            (status.clone(), serde_json::to_value(status)?)
        }
        Command::DropPartition { collection, tag } => {
            let status = service.drop_partition(ctx, &collection, &tag).await;
            (status.clone(), serde_json::to_value(status)?)
        }
        Command::ShowPartitions { collection } => {
            let response = service.show_partitions(ctx, &collection).await;
            (response.status.clone(), serde_json::to_value(response)?)
        }
        Command::AllocTs { count } => {
            let response = service.alloc_timestamp(ctx, count).await;
            (response.status.clone(), serde_json::to_value(response)?)
        }
        Command::AllocId { count } => {
            let response = service.alloc_id(ctx, count).await;
            (response.status.clone(), serde_json::to_value(response)?)
        }
    };
    Ok(outcome)
}

fn parse_field(spec: &str) -> Result<FieldSchema> {
    let mut parts = spec.split(':');
    let name = parts
        .next()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow!("field '{}' has no name", spec))?;
    let data_type = parts
        .next()
        .ok_or_else(|| anyhow!("field '{}' has no type", spec))?;

    let mut field = FieldSchema::new(name, DataType::parse(data_type)?);
    for option in parts {
        match option.split_once('=') {
            Some((key, value)) => field = field.with_param(key, value),
            None if option.eq_ignore_ascii_case("pk") => field = field.primary_key(),
            None => bail!("unknown field option '{}' in '{}'", option, spec),
        }
    }
    Ok(field)
}
