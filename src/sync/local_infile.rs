use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::buffer_pool::BufferPurpose;
use crate::error::Result;

use super::conn::Conn;

/// Bytes of the local file sent per packet
const CHUNK_SIZE: usize = 64 * 1024;

impl Conn {
    /// Answer a `LOAD DATA LOCAL INFILE` request with the contents of `name`.
    ///
    /// The transfer always ends with an empty packet so the server can send its
    /// response. A file that cannot be read is reported as `Ok(Err(message))`
    /// after the empty packet; only transport failures are returned as errors.
    pub(super) fn send_local_file(&mut self, name: &str) -> Result<std::result::Result<u64, String>> {
        let opened = if self.opts.allow_local_infile {
            open_local_file(name, self.opts.local_infile_dir.as_deref())
        } else {
            Err(format!(
                "server requested local file '{name}' but allow_local_infile is off"
            ))
        };

        let outcome = match opened {
            Ok(file) => self.stream_file(file)?,
            Err(message) => Err(message),
        };
        if let Err(message) = &outcome {
            tracing::warn!(file = name, %message, "local infile request refused");
        }
        self.channel.send(&[])?;

        if let Ok(sent) = &outcome {
            tracing::debug!(file = name, bytes = sent, "local infile sent");
        }
        Ok(outcome)
    }

    /// Send `file` in fixed-size packets. A read error stops the transfer and
    /// is returned as the inner error.
    fn stream_file(&mut self, mut file: File) -> Result<std::result::Result<u64, String>> {
        let mut chunk = self.pool.take(BufferPurpose::FileTransfer);
        chunk.resize(CHUNK_SIZE, 0);
        let mut sent = 0u64;
        let outcome = loop {
            let read = match file.read(&mut chunk) {
                Ok(0) => break Ok(Ok(sent)),
                Ok(read) => read,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => break Ok(Err(format!("failed to read local file: {err}"))),
            };
            if let Err(err) = self.channel.send(&chunk[..read]) {
                break Err(err);
            }
            sent += read as u64;
        };
        self.pool.give_back(BufferPurpose::FileTransfer, chunk);
        outcome
    }
}

/// Open `name`, which must resolve inside `allowed_dir` when one is given.
fn open_local_file(name: &str, allowed_dir: Option<&Path>) -> std::result::Result<File, String> {
    let path = PathBuf::from(name);
    if let Some(dir) = allowed_dir {
        let dir = dir
            .canonicalize()
            .map_err(|err| format!("local_infile_dir {}: {err}", dir.display()))?;
        let resolved = if path.is_absolute() {
            path.clone()
        } else {
            dir.join(&path)
        };
        let resolved = resolved
            .canonicalize()
            .map_err(|err| format!("local file '{name}': {err}"))?;
        if !resolved.starts_with(&dir) {
            return Err(format!(
                "local file '{name}' is outside {}",
                dir.display()
            ));
        }
        return File::open(&resolved).map_err(|err| format!("local file '{name}': {err}"));
    }
    File::open(&path).map_err(|err| format!("local file '{name}': {err}"))
}
