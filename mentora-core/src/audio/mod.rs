//! Audio device access.
//!
//! The engine never talks to cpal directly; it goes through `AudioBackend`,
//! which opens one microphone stream and one speaker output per session.
//! `CpalBackend` is the real implementation, `wav::WavBackend` reads the
//! microphone from a file, and tests supply their own.
//!
//! # Threading note
//!
//! Input streams are not required to be `Send`: `cpal::Stream` is bound to
//! its creation thread on Windows and macOS. The engine opens, polls and
//! drops the input on the capture pipeline thread. Outputs must be `Send`
//! because they move into the session task.

#[cfg(feature = "audio-cpal")]
pub mod capture;
pub mod device;
pub mod output;
pub mod resample;
pub mod wav;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize},
    Arc,
};

use crate::buffering::AudioProducer;
use crate::error::Result;
use crate::playback::PlaybackOutput;

/// An open microphone. Dropping it releases the device.
pub trait InputStream {
    /// Native rate of the samples pushed into the ring (Hz).
    fn sample_rate(&self) -> u32;

    /// Stop pushing samples. The device is released on drop.
    fn stop(&self);

    /// Running count of samples lost because the ring was full, for inputs
    /// that push from a real-time callback.
    fn overruns(&self) -> Option<Arc<AtomicUsize>> {
        None
    }
}

/// Opens the devices a voice session needs.
pub trait AudioBackend: Send + Sync + 'static {
    /// Open a microphone that pushes mono f32 samples into `producer` while
    /// `gate` is set.
    ///
    /// # Errors
    /// A permission-class error (`MentoraError::is_permission`) when the
    /// microphone cannot be used.
    fn open_input(
        &self,
        producer: AudioProducer,
        gate: Arc<AtomicBool>,
        preferred: Option<&str>,
    ) -> Result<Box<dyn InputStream>>;

    /// Open the speaker output for mentor audio.
    fn open_output(&self, preferred: Option<&str>) -> Result<Box<dyn PlaybackOutput>>;
}

/// System microphone and speakers through cpal.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    #[cfg(feature = "audio-cpal")]
    fn open_input(
        &self,
        producer: AudioProducer,
        gate: Arc<AtomicBool>,
        preferred: Option<&str>,
    ) -> Result<Box<dyn InputStream>> {
        Ok(Box::new(capture::CpalInput::open(producer, gate, preferred)?))
    }

    #[cfg(not(feature = "audio-cpal"))]
    fn open_input(
        &self,
        _producer: AudioProducer,
        _gate: Arc<AtomicBool>,
        _preferred: Option<&str>,
    ) -> Result<Box<dyn InputStream>> {
        Err(crate::error::MentoraError::MicrophonePermission(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn open_output(&self, preferred: Option<&str>) -> Result<Box<dyn PlaybackOutput>> {
        Ok(Box::new(output::CpalOutput::open(preferred)?))
    }
}

/// Speaker-less backend output: plays against the wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentOutputBackend;

impl AudioBackend for SilentOutputBackend {
    fn open_input(
        &self,
        _producer: AudioProducer,
        _gate: Arc<AtomicBool>,
        _preferred: Option<&str>,
    ) -> Result<Box<dyn InputStream>> {
        Err(crate::error::MentoraError::NoDefaultInputDevice)
    }

    fn open_output(&self, _preferred: Option<&str>) -> Result<Box<dyn PlaybackOutput>> {
        Ok(Box::new(output::NullOutput::new()))
    }
}
