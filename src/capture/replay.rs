use std::time::Duration;

use super::{Batch, CaptureSource};
use crate::error::SourceError;
use crate::packet::{FrameMeta, Timestamp};

/// A finite, in-memory capture source.
///
/// Frames are handed out in order; once the last one has been appended to a
/// batch the source reports itself exhausted. Useful for tests, benchmarks
/// and replaying frames that were captured elsewhere.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    frames: Vec<(FrameMeta, Vec<u8>)>,
    next: usize,
    batch_limit: usize,
}

impl ReplaySource {
    /// Frames with synthetic timestamps one millisecond apart.
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        let frames = frames
            .into_iter()
            .enumerate()
            .map(|(i, data)| {
                let ms = i as u64;
                let meta = FrameMeta {
                    timestamp: Timestamp::from_micros(ms / 1000, (ms % 1000) as u32 * 1000),
                    wire_len: data.len() as u32,
                };
                (meta, data)
            })
            .collect();
        Self::from_frames(frames)
    }

    /// Frames with caller-provided metadata.
    pub fn from_frames(frames: Vec<(FrameMeta, Vec<u8>)>) -> Self {
        ReplaySource {
            frames,
            next: 0,
            batch_limit: usize::MAX,
        }
    }

    /// Cap the number of frames appended per batch.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Frames not handed out yet.
    pub fn remaining(&self) -> usize {
        self.frames.len() - self.next
    }
}

impl CaptureSource for ReplaySource {
    fn next_batch(
        &mut self,
        batch: &mut Batch,
        max: usize,
        _timeout: Duration,
    ) -> Result<usize, SourceError> {
        let max = max.min(self.batch_limit);
        let mut added = 0;
        while added < max {
            let Some((meta, data)) = self.frames.get(self.next) else {
                break;
            };
            if !batch.push(*meta, data) {
                break;
            }
            self.next += 1;
            added += 1;
        }
        Ok(added)
    }

    fn is_exhausted(&self) -> bool {
        self.next >= self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_that_do_not_fit_wait_for_the_next_batch() {
        let mut source = ReplaySource::new(vec![vec![1; 6], vec![2; 6], vec![3; 2]]);
        let mut batch = Batch::new(8, 8);
        let timeout = Duration::from_millis(1);

        assert_eq!(source.next_batch(&mut batch, 8, timeout).unwrap(), 1);
        assert_eq!(source.remaining(), 2);

        batch.clear();
        assert_eq!(source.next_batch(&mut batch, 8, timeout).unwrap(), 2);
        assert!(source.is_exhausted());

        batch.clear();
        assert_eq!(source.next_batch(&mut batch, 8, timeout).unwrap(), 0);
    }

    #[test]
    fn timestamps_advance() {
        let mut source = ReplaySource::new(vec![vec![0; 4]; 3]);
        let mut batch = Batch::new(64, 8);
        source.next_batch(&mut batch, 8, Duration::ZERO).unwrap();
        assert_eq!(batch.frame(2).0.timestamp, Timestamp::from_micros(0, 2000));
    }
}
