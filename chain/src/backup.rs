use crate::{Chain, ChainError};
use containers::Block;
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::debug;

/// Largest frame accepted when restoring; anything bigger is a corrupt or
/// hostile stream.
const MAX_FRAME_LEN: u64 = 1 << 26;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup io: {0}")]
    Io(#[from] io::Error),

    #[error("backup codec: {0}")]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Serialize every committed block in height order as length-prefixed
/// frames: an 8-byte big-endian length followed by the block's serialized
/// bytes. Returns how many blocks were written.
pub fn export_chain<W: Write>(chain: &dyn Chain, mut writer: W) -> Result<u64, BackupError> {
    let mut written = 0;
    for height in 1..=chain.current_height() {
        let Some(block) = chain.block_by_height(height) else {
            continue;
        };
        let bytes = bincode::serialize(&block)?;
        writer.write_all(&(bytes.len() as u64).to_be_bytes())?;
        writer.write_all(&bytes)?;
        written += 1;
    }
    writer.flush()?;
    debug!(chain = %chain.id(), blocks = written, "Exported chain backup");
    Ok(written)
}

/// Read length-prefixed frames until end of stream, inserting each block
/// with full validation. Blocks already present are skipped. Returns how
/// many blocks were newly inserted.
pub fn restore_chain<R: Read>(chain: &dyn Chain, mut reader: R) -> Result<u64, BackupError> {
    let mut restored = 0;
    loop {
        let mut len_bytes = [0u8; 8];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }

        let len = u64::from_be_bytes(len_bytes);
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("backup frame of {len} bytes exceeds limit"),
            )
            .into());
        }

        let mut bytes = vec![0u8; len as usize];
        reader.read_exact(&mut bytes)?;
        let block: Block = bincode::deserialize(&bytes)?;
        if chain.has_block(&block) {
            continue;
        }
        chain.insert_block(&block, true)?;
        restored += 1;
    }
    debug!(chain = %chain.id(), blocks = restored, "Restored chain backup");
    Ok(restored)
}
