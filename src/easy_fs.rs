use std::io::BufWriter;
use std::{path::{Path, PathBuf}, fs::File};
use std::time::UNIX_EPOCH;

use anyhow::{Result, Context, anyhow};


/// Modification time of the file at `path` in seconds since the
/// epoch, None if it isn't a file or can't be stat'ed.
pub fn file_mtime_unix<P: AsRef<Path>>(path: P) -> Option<u64> {
    let metadata = path.as_ref().metadata().ok()?;
    if !metadata.is_file() {
        return None
    }
    let mtime = metadata.modified().ok()?;
    Some(mtime.duration_since(UNIX_EPOCH).ok()?.as_secs())
}

pub fn open_log_output<P>(
    path: P
) -> Result<Box<BufWriter<File>>>
where PathBuf: From<P>
{
    let mut outp = File::options();
    outp.write(true).append(true).create(true);
    let pathb = PathBuf::from(path);
    if let Some(parent) = pathb.parent() {
        let _ignore = std::fs::create_dir(parent);
    }
    Ok(Box::new(BufWriter::new(outp.open(&pathb).with_context(
        || anyhow!("opening log for output: {:?}", pathb.to_string_lossy()))?)))
}
