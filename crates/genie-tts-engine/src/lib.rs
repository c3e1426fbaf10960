//! Genie TTS engine: remote model lifecycle, synthesis with retries, and
//! WAV post-processing.

pub mod artifacts;
pub mod backend;
pub mod lifecycle;
pub mod synth;
pub mod wav;

pub use artifacts::ArtifactDir;
pub use backend::{HttpTtsBackend, TtsBackend};
pub use lifecycle::{ModelLifecycle, ModelSettings, ModelSnapshot, ModelState, UnloadOutcome};
pub use synth::{AudioSynthesizer, SynthesisArtifact, SynthesisSettings};
