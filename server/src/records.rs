//! Storage for finished games.
//!
//! Records are write-only from the server's point of view; nothing read back
//! influences a running game. [`FileRecords`] appends each record as a
//! little-endian `u32` length followed by the `bincode` payload.

use crate::error::{Result, ServerError};
use crate::game::Game;
use log::debug;
use serde::{Deserialize, Serialize};
use shared::{GameState, PackedWord, PlayedWord};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Upper bound on one stored record. A six-round game encodes to well under
/// a kilobyte.
pub const MAX_RECORD_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub target: PackedWord,
    pub board: Vec<PlayedWord>,
    pub won: bool,
    pub total_users: u32,
}

fn unix_millis(time: SystemTime) -> u64 {
    let elapsed = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    elapsed.as_millis().min(u64::MAX as u128) as u64
}

impl GameRecord {
    pub fn from_game(game: &Game, total_users: usize, ended_at: SystemTime) -> Self {
        Self {
            started_at_ms: unix_millis(game.started_at),
            ended_at_ms: unix_millis(ended_at),
            target: game.target,
            board: game.played().to_vec(),
            won: game.state == GameState::Won,
            total_users: total_users.min(u32::MAX as usize) as u32,
        }
    }

    pub fn rounds(&self) -> usize {
        self.board.len()
    }
}

pub trait GameRecords: Send + Sync {
    /// Stores a finished game. Blocking; callers on the runtime should move
    /// this onto a blocking thread.
    fn persist_finished_game(&self, record: &GameRecord) -> Result<()>;
}

/// Keeps nothing. Used when no records path is configured.
pub struct DiscardRecords;

impl GameRecords for DiscardRecords {
    fn persist_finished_game(&self, record: &GameRecord) -> Result<()> {
        debug!(
            "Discarding record for game with target {} ({} rounds)",
            record.target,
            record.rounds()
        );
        Ok(())
    }
}

pub struct FileRecords {
    path: PathBuf,
    /// Serializes appends so records never interleave.
    writer: Mutex<()>,
}

impl FileRecords {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record in the file. A missing file holds no records.
    pub fn read_all(&self) -> Result<Vec<GameRecord>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        loop {
            let mut len = [0u8; 4];
            match reader.read_exact(&mut len) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len) as usize;
            if len > MAX_RECORD_LEN {
                return Err(ServerError::RecordTooLarge(len));
            }
            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload)?;
            records.push(bincode::deserialize(&payload)?);
        }
        Ok(records)
    }
}

impl GameRecords for FileRecords {
    fn persist_finished_game(&self, record: &GameRecord) -> Result<()> {
        let payload = bincode::serialize(record)?;
        if payload.len() > MAX_RECORD_LEN {
            return Err(ServerError::RecordTooLarge(payload.len()));
        }
        let len = payload.len() as u32;

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&frame)?;
        file.flush()?;

        debug!("Stored game record in {}", self.path.display());
        Ok(())
    }
}
