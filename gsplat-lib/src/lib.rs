pub mod common;
mod decode;
pub mod device;
pub mod error;
pub mod functions;
pub mod header;
pub mod interface;
pub mod proxy;
pub mod render_thread;
pub mod settings;
mod structures;

pub use decode::decode_records;
pub use device::{BufferHandle, Float4, GpuDevice, HostDevice};
pub use error::{DeviceError, ProxyError, SplatError, SplatErrorKind};
pub use functions::{FunctionTable, FunctionValue, SplatFunction};
pub use header::{parse_header, Encoding, Schema};
pub use interface::{Activation, SplatDataInterface};
pub use proxy::{BufferSet, InstanceId, InstanceStatus, ShaderParameters, SplatProxy};
pub use render_thread::{RenderHandle, RenderThread};
pub use settings::SplatSettings;
pub use structures::{SplatRecord, SplatStore};

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Parses a complete `.ply` file held in memory.
pub fn parse_splats(raw_data: &[u8]) -> Result<Vec<SplatRecord>, SplatError> {
    let (schema, offset) = parse_header(raw_data)?;
    let records = decode_records(&schema, raw_data, offset)?;
    log::info!(
        "Parsed {} splats ({:?}, {} properties, {} higher-order SH coefficients)",
        records.len(),
        schema.encoding,
        schema.fields.len(),
        schema.roles.sh_rest.len()
    );
    Ok(records)
}

/// Parses `raw_data` into a fresh store with its own generation.
pub fn load_splats(raw_data: &[u8]) -> Result<SplatStore, SplatError> {
    parse_splats(raw_data).map(SplatStore::new)
}

fn read_error(path: &Path, e: std::io::Error) -> SplatError {
    if e.kind() == ErrorKind::NotFound {
        SplatError::FileNotFound(path.to_path_buf())
    } else {
        SplatError::UnreadableFile(path.to_path_buf(), e)
    }
}

pub fn read_splat_file(path: impl AsRef<Path>) -> Result<SplatStore, SplatError> {
    let path = path.as_ref();
    let raw_data = fs::read(path).map_err(|e| read_error(path, e))?;
    load_splats(&raw_data)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    /// Reads the file with `tokio::fs`; parsing still runs on the calling task.
    pub async fn read_splat_file_async(path: impl AsRef<Path>) -> Result<SplatStore, SplatError> {
        let path = path.as_ref();
        let raw_data = tokio::fs::read(path)
            .await
            .map_err(|e| read_error(path, e))?;
        load_splats(&raw_data)
    }
}
}
