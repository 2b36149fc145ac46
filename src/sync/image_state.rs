use crate::error::RenderError;

/// Host-observed phase of the shared image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePhase {
    /// Never written since creation
    Idle,
    /// A compute write was submitted and has not been observed complete
    Writing,
    /// The latest write completed; the image may be overwritten
    Readable,
}

/// `Idle -> Writing -> Readable -> Writing -> ...`
///
/// Generations count compute writes. Graphics reads are recorded against the
/// latest submitted generation, which the device-side dependency guarantees
/// they observe.
#[derive(Debug, Clone)]
pub struct SharedImageState {
    phase: ImagePhase,
    generation: u64,
    completed: u64,
    reads: u64,
}

impl Default for SharedImageState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedImageState {
    pub fn new() -> Self {
        SharedImageState {
            phase: ImagePhase::Idle,
            generation: 0,
            completed: 0,
            reads: 0,
        }
    }

    pub fn phase(&self) -> ImagePhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn completed_generation(&self) -> u64 {
        self.completed
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn begin_write(&mut self) -> Result<u64, RenderError> {
        if self.phase == ImagePhase::Writing {
            return Err(RenderError::ImageStateViolation(
                "compute write submitted before the previous write was observed complete",
            ));
        }
        self.generation += 1;
        self.phase = ImagePhase::Writing;
        Ok(self.generation)
    }

    pub fn complete_write(&mut self) {
        if self.phase == ImagePhase::Writing {
            self.completed = self.generation;
            self.phase = ImagePhase::Readable;
        }
    }

    /// Record a graphics read; returns the generation it samples.
    pub fn record_read(&mut self) -> Result<u64, RenderError> {
        if self.phase == ImagePhase::Idle {
            return Err(RenderError::ImageStateViolation(
                "graphics read recorded before any compute write",
            ));
        }
        self.reads += 1;
        Ok(self.generation)
    }

    /// The image was recreated; its contents are undefined again.
    pub fn reset(&mut self) {
        self.phase = ImagePhase::Idle;
    }
}
