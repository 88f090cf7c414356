use crate::pipeline::PipelineConfig;
use crate::server::store::BucketType;
use anyhow::{Context, bail};
use clap::Parser;

/// Runtime configuration for the `quota-pipeline` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for local use.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "quota-pipeline",
    version,
    about = "Multiplexes NDJSON quota requests over an in-memory token bucket store"
)]
pub struct CliArgs {
    /// Capacity of the inbound channel.
    ///
    /// Submissions beyond this many buffered units wait until the pipeline
    /// catches up.
    ///
    /// Environment variable: `INPUT_BUFFER`
    #[arg(long, env = "INPUT_BUFFER", default_value_t = 50)]
    pub input_buffer: usize,

    /// Capacity of the outbound channel.
    ///
    /// Once this many responses are waiting to be written, the pipeline
    /// holds further responses in its own queue.
    ///
    /// Environment variable: `OUTPUT_BUFFER`
    #[arg(long, env = "OUTPUT_BUFFER", default_value_t = 50)]
    pub output_buffer: usize,

    /// Comma-separated bucket type definitions, each `name:size:per_second`.
    ///
    /// Example: "ip:10:1,user:100:10"
    ///
    /// Environment variable: `BUCKETS`
    #[arg(long, env = "BUCKETS", default_value_t = String::from("default:10:1"))]
    pub buckets: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub pipeline: PipelineConfig,
    pub buckets: Vec<BucketType>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.input_buffer == 0 {
            bail!("INPUT_BUFFER must be greater than 0");
        }

        if args.output_buffer == 0 {
            bail!("OUTPUT_BUFFER must be greater than 0");
        }

        let buckets = args
            .buckets
            .split(',')
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                raw.parse::<BucketType>()
                    .with_context(|| format!("invalid BUCKETS entry `{raw}`"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        if buckets.is_empty() {
            bail!("BUCKETS must define at least one bucket type");
        }

        Ok(Self {
            pipeline: PipelineConfig {
                input_buffer: args.input_buffer,
                output_buffer: args.output_buffer,
            },
            buckets,
        })
    }
}
