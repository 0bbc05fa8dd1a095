use clap::Parser;
use glam::Vec4;
use gsplat_lib::{
    FunctionTable, HostDevice, InstanceStatus, ProxyError, RenderThread, SplatDataInterface,
    SplatErrorKind, SplatSettings,
};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "Gaussian Splat Loader",
    version = "1.0",
    about = "Loads PLY splat files and uploads them to a host-memory GPU device"
)]
struct Cli {
    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input PLY file, relative to the content root."
    )]
    input: PathBuf,

    #[arg(
        long = "content-root",
        value_name = "DIR",
        default_value = ".",
        help = "Directory relative input paths are resolved against."
    )]
    content_root: PathBuf,

    #[arg(
        short = 'n',
        long = "instances",
        value_name = "INSTANCES",
        default_value = "1",
        help = "Number of rendering instances to activate."
    )]
    instances: u32,

    #[arg(
        short = 't',
        long = "tint",
        value_name = "R,G,B,A",
        default_value = "1,1,1,1",
        value_parser = parse_tint,
        help = "Global tint applied to splat colors."
    )]
    tint: Vec4,

    #[arg(
        short = 'b',
        long = "budget",
        value_name = "BYTES",
        help = "Limit device memory to this many bytes."
    )]
    budget: Option<usize>,

    #[arg(
        short = 's',
        long = "show",
        value_name = "COUNT",
        default_value = "0",
        help = "Print the first COUNT splats."
    )]
    show: i32,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Read the input file asynchronously."
    )]
    async_mode: bool,
}

fn parse_tint(s: &str) -> Result<Vec4, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("'{}': {}", v, e)))
        .collect::<Result<Vec<_>, _>>()?;
    match values[..] {
        [r, g, b] => Ok(Vec4::new(r, g, b, 1.0)),
        [r, g, b, a] => Ok(Vec4::new(r, g, b, a)),
        _ => Err(format!("expected 3 or 4 comma separated values, got {}", values.len())),
    }
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::init();
    let cli = Cli::parse();

    let settings = SplatSettings {
        content_root: cli.content_root.clone(),
        auto_load_path: None,
        auto_load: false,
        global_tint: cli.tint,
    };
    let path = settings.resolve(&cli.input);

    let device = match cli.budget {
        Some(bytes) => HostDevice::with_budget(bytes),
        None => HostDevice::new(),
    };
    let render_thread = RenderThread::spawn(device.clone())?;
    let mut data = SplatDataInterface::from_settings(&settings, render_thread.handle())?;

    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    println!(
        "Mode: {} | Input: {} | Instances: {}",
        mode,
        path.display(),
        cli.instances
    );

    let start = Instant::now();
    let loaded = if cli.async_mode {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        rt.block_on(data.load_async(&path))
    } else {
        data.load(&path)
    };
    let count = match loaded {
        Ok(count) => count,
        Err(e) if matches!(e.kind(), SplatErrorKind::FileNotFound | SplatErrorKind::UnreadableFile) => {
            eprintln!("Error reading input file {}: {}", path.display(), e);
            process::exit(1);
        }
        Err(e) => return Err(Box::new(e)),
    };
    println!(
        "Parsed {} splats in {} ms",
        count,
        start.elapsed().as_millis()
    );

    for _ in 0..cli.instances {
        match data.activate() {
            Ok(activation) => {
                let params = data.bind(activation.id)?;
                println!(
                    "Instance {}: {:?}, {} splats, tint {:?}",
                    activation.id, activation.status, params.splats_count, params.global_tint
                );
                for (name, handle) in params.buffer_bindings() {
                    println!("  {} -> buffer {} ({} elements)", name, handle.id(), handle.elements());
                }
            }
            Err(ProxyError::Device(e)) => {
                let id = data.active_instances().last().copied();
                let status = match id {
                    Some(id) => data.status(id)?,
                    None => InstanceStatus::Removed,
                };
                eprintln!("Upload failed ({}), instance is {:?} and draws nothing", e, status);
            }
            Err(e) => return Err(Box::new(e)),
        }
    }

    if cli.show > 0 {
        let table = FunctionTable::new();
        let shown = cli.show.min(data.count());
        for signature in table.signatures() {
            let Some(function) = table.resolve(signature.name) else {
                continue;
            };
            if signature.inputs.is_empty() {
                println!("{} = {:?}", signature.name, data.call(function, 0));
                continue;
            }
            for index in 0..shown {
                println!("{}({}) = {:?}", signature.name, index, data.call(function, index));
            }
        }
    }

    println!(
        "Device memory in use: {} bytes across {} buffers",
        device.used_bytes(),
        device.live_buffers()
    );

    drop(data);
    render_thread.shutdown();
    println!("Released all buffers ({} live).", device.live_buffers());

    Ok(())
}
