use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, info};

use crate::{best_observation, Detection, Detector, TargetObservation};

/// One line of a replay file: every detection the backend produced for a frame.
#[derive(Debug, Deserialize)]
struct ReplayRecord {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Plays back recorded detector output, one JSON line per tick.
/// Blank lines and `#` comments are skipped.
///
/// `observe` may be dropped mid-read (a detector timeout); the partial line
/// stays in `pending` and the next call resumes it.
pub struct ReplayDetector {
    path: PathBuf,
    reader: BufReader<File>,
    pending: Vec<u8>,
    rewound: bool,
    looped: bool,
    frame: (u32, u32),
    line_no: u64,
    exhausted: bool,
}

impl ReplayDetector {
    pub fn open(path: impl AsRef<Path>, looped: bool, frame_w: u32, frame_h: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let f = std::fs::File::open(&path).with_context(|| format!("open replay file {}", path.display()))?;
        info!("replay: {} (loop={})", path.display(), looped);
        Ok(Self {
            path,
            reader: BufReader::new(File::from_std(f)),
            pending: Vec::new(),
            rewound: false,
            looped,
            frame: (frame_w, frame_h),
            line_no: 0,
            exhausted: false,
        })
    }

    async fn next_record(&mut self) -> Result<Option<ReplayRecord>> {
        loop {
            let n = self.reader.read_until(b'\n', &mut self.pending).await?;
            if n == 0 && self.pending.is_empty() {
                if !self.looped || self.rewound {
                    return Ok(None);
                }
                debug!("replay: rewinding {}", self.path.display());
                self.reader.seek(SeekFrom::Start(0)).await?;
                self.line_no = 0;
                self.rewound = true;
                continue;
            }
            let line = std::mem::take(&mut self.pending);
            self.line_no += 1;

            let t = std::str::from_utf8(&line)
                .with_context(|| format!("{}:{} is not utf-8", self.path.display(), self.line_no))?
                .trim();
            if t.is_empty() || t.starts_with('#') {
                continue;
            }
            let rec = serde_json::from_str(t)
                .with_context(|| format!("parse {}:{}", self.path.display(), self.line_no))?;
            self.rewound = false;
            return Ok(Some(rec));
        }
    }
}

#[async_trait]
impl Detector for ReplayDetector {
    async fn observe(&mut self) -> Result<Option<TargetObservation>> {
        if self.exhausted {
            return Ok(None);
        }
        let Some(rec) = self.next_record().await? else {
            info!("replay: end of {}", self.path.display());
            self.exhausted = true;
            return Ok(None);
        };
        let (w, h) = self.frame;
        let dets: Vec<Detection> = rec.detections.into_iter().map(|d| d.clamp_to(w, h)).collect();
        Ok(best_observation(&dets))
    }
}
