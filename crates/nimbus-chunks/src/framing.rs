//! Frame alignment and upload-part coalescing
//!
//! Sources hand out reads of whatever size they like; the stream cipher wants
//! exact chunks. [`FrameAligner`] buffers reads and cuts them into frames of a
//! fixed size, always holding the most recent frame back until [`finish`] so
//! the caller knows which frame is last and can tag it final.
//!
//! [`PartCoalescer`] groups cipher frames into numbered upload parts. Part
//! numbers start at 1, the stream header rides at the front of part 1 only,
//! and a frame is never split across two parts.
//!
//! [`finish`]: FrameAligner::finish

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::FramingError;

/// Cuts an arbitrary byte stream into frames of exactly `frame_size` bytes.
#[derive(Debug)]
pub struct FrameAligner {
    frame_size: usize,
    buf: BytesMut,
}

impl FrameAligner {
    pub fn new(frame_size: usize) -> Result<Self, FramingError> {
        if frame_size == 0 {
            return Err(FramingError::ZeroChunkSize);
        }
        Ok(Self {
            frame_size,
            buf: BytesMut::with_capacity(frame_size),
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Bytes currently held back
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed a read. Returns every frame that is known not to be the last one.
    ///
    /// A frame is only released once at least one byte beyond it has arrived,
    /// so a full frame sitting at the end of the input stays buffered.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        if data.is_empty() {
            return Vec::new();
        }
        self.buf.extend_from_slice(data);

        let mut frames = Vec::with_capacity(self.buf.len() / self.frame_size);
        while self.buf.len() > self.frame_size {
            frames.push(self.buf.split_to(self.frame_size).freeze());
        }
        frames
    }

    /// Release the held-back remainder: the last frame, possibly empty.
    pub fn finish(self) -> Bytes {
        trace!(remainder = self.buf.len(), "frame aligner finished");
        self.buf.freeze()
    }
}

/// One multipart upload part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    /// 1-based
    pub part_number: u32,
    pub data: Bytes,
}

/// Groups cipher frames into upload parts of `frames_per_part` frames each.
#[derive(Debug)]
pub struct PartCoalescer {
    frames_per_part: usize,
    next_part: u32,
    pending: BytesMut,
    pending_frames: usize,
}

impl PartCoalescer {
    pub fn new(frames_per_part: usize) -> Result<Self, FramingError> {
        if frames_per_part == 0 {
            return Err(FramingError::ZeroFramesPerPart);
        }
        Ok(Self {
            frames_per_part,
            next_part: 1,
            pending: BytesMut::new(),
            pending_frames: 0,
        })
    }

    /// Prepend the stream header to part 1. Must precede every frame.
    pub fn push_header(&mut self, header: &[u8]) -> Result<(), FramingError> {
        if self.next_part != 1 || self.pending_frames != 0 {
            return Err(FramingError::HeaderAfterFrames);
        }
        self.pending.extend_from_slice(header);
        Ok(())
    }

    /// Add a cipher frame; returns a part once `frames_per_part` have gathered.
    pub fn push_frame(&mut self, frame: &[u8]) -> Option<UploadPart> {
        self.pending.extend_from_slice(frame);
        self.pending_frames += 1;
        if self.pending_frames == self.frames_per_part {
            Some(self.emit())
        } else {
            None
        }
    }

    /// Flush a partially filled last part, if anything is pending.
    pub fn finish(mut self) -> Option<UploadPart> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.emit())
        }
    }

    fn emit(&mut self) -> UploadPart {
        let part = UploadPart {
            part_number: self.next_part,
            data: self.pending.split().freeze(),
        };
        trace!(
            part = part.part_number,
            frames = self.pending_frames,
            bytes = part.data.len(),
            "upload part ready"
        );
        self.next_part += 1;
        self.pending_frames = 0;
        part
    }
}
