//! Command-line shell around the sandbox.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use workgraph_sandbox::backend::DummyDevice;
use workgraph_sandbox::{sandbox, SandboxConfig, DEFAULT_GRAPH_NAME};

#[derive(Parser, Debug)]
#[command(
    name = "workgraph-sandbox",
    about = "Compile a work-graph shader library, dispatch it, and dump the output UAV"
)]
struct Args {
    /// Shader library file; uses the built-in sandbox graph when omitted.
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Name of the graph program registered inside the library.
    #[arg(long, default_value = DEFAULT_GRAPH_NAME)]
    graph_name: String,

    /// Compile node shaders into a collection object first, then include
    /// the existing collection in the executable program.
    #[arg(short = 'c', long = "collections")]
    use_collections: bool,

    /// Compile-time shader defines.
    #[arg(short = 'D', long = "define", value_name = "KEY[=VALUE]")]
    defines: Vec<String>,

    /// Size of the output buffer the graph writes into, in u32 units.
    #[arg(long, default_value_t = 1 << 20)]
    output_buffer_uints: u32,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = SandboxConfig {
        graph_name: args.graph_name,
        use_collections: args.use_collections,
        output_buffer_uints: args.output_buffer_uints,
        ..SandboxConfig::default()
    };
    if let Some(path) = &args.file {
        config.source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                log::error!("cannot read {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        };
        config.source_name = path.display().to_string();
    }
    for define in &args.defines {
        let (key, value) = define
            .split_once('=')
            .unwrap_or((define.as_str(), ""));
        config.defines.push((key.to_string(), value.to_string()));
    }

    let mut device = DummyDevice::new();
    match sandbox::run(&mut device, &config) {
        Ok(report) => {
            println!(
                "graph \"{}\": {} nodes, {} entrypoints, {} records dispatched",
                config.graph_name,
                report.num_nodes,
                report.num_entrypoints,
                report.num_records_dispatched
            );
            for (i, word) in report.output_words.iter().enumerate() {
                println!("UAV[{i}] = {word:#010x}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
