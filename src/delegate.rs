use crate::Warning;

/// Receives warnings and progress while a file is decoded, and can stop the
/// decoder early.
///
/// A `Vec<Warning>` is a delegate that collects all warnings.
pub trait DecodeDelegate {
    /// A chunk or cel could not be decoded and was skipped.
    fn warning(&mut self, warning: Warning);

    /// Fraction of the input consumed so far, between 0.0 and 1.0.
    fn progress(&mut self, _fraction: f32) {}

    /// Polled after every chunk and during long decompression. When this
    /// returns `true` the decoder stops after the current chunk.
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl DecodeDelegate for Vec<Warning> {
    fn warning(&mut self, warning: Warning) {
        self.push(warning);
    }
}

/// Receives progress while a file is encoded, and can stop the encoder.
pub trait EncodeDelegate {
    /// Fraction of the frames written so far, between 0.0 and 1.0.
    fn progress(&mut self, _fraction: f32) {}

    /// Polled after every frame and cel. When this returns `true` encoding
    /// stops with [crate::AsepriteError::Cancelled].
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl EncodeDelegate for () {}
