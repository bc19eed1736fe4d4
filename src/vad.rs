//! Volume-based voice activity detection over 8kHz μ-law carrier audio
//! (spec.md §4.2).
//!
//! Ported from
//! `examples/original_source/src/modules/vad/volume_based_vad.py`'s
//! `VolumeBasedVADModel`: a sliding mean-absolute-amplitude window against a
//! fixed threshold, with a ring buffer of per-window speech/silence flags
//! driving `fast_end`/`slow_end`. The teacher's `voice/vad.rs` wraps its
//! state in `Arc<Mutex<_>>` for a multi-threaded local-mic pipeline; this
//! VAD is owned exclusively by one session worker (spec.md §4.9's
//! single-owner rule), so the state here is plain fields with `&mut self`
//! methods instead.

use std::collections::VecDeque;

use crate::audio::mean_abs_amplitude;

/// Tunables for [`VolumeVad`], mirroring `VolumeBasedVADModel`'s constructor
/// defaults (window/overlap in seconds at construction, stored here as
/// sample counts once a sample rate is known).
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub sample_rate: usize,
    pub window_seconds: f32,
    pub overlap_seconds: f32,
    pub volume_threshold: f32,
    /// Consecutive silent windows before `fast_end` latches (~400ms).
    pub fast_end_windows: usize,
    /// Consecutive silent windows before `slow_end` latches.
    pub slow_end_windows: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8_000,
            window_seconds: 0.01,
            overlap_seconds: 0.005,
            volume_threshold: 1000.0,
            fast_end_windows: 20,
            slow_end_windows: 80,
        }
    }
}

impl VadConfig {
    fn window_samples(&self) -> usize {
        (self.sample_rate as f32 * self.window_seconds) as usize
    }

    fn overlap_samples(&self) -> usize {
        (self.sample_rate as f32 * self.overlap_seconds) as usize
    }
}

/// Outcome of feeding one chunk of audio into the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VadUpdate {
    /// Any window in this chunk crossed the volume threshold.
    pub is_speech: bool,
    /// Short trailing silence has elapsed since the last speech window
    /// (turn-taking hint: the caller is plausibly done with a short phrase).
    pub fast_end: bool,
    /// Longer trailing silence has elapsed (high-confidence end of turn).
    pub slow_end: bool,
}

/// Sliding-window, single-owner volume-based speech detector.
pub struct VolumeVad {
    config: VadConfig,
    buffer: VecDeque<i16>,
    history: VecDeque<bool>,
    speech_window_count: u64,
    processed_samples: u64,
}

impl VolumeVad {
    pub fn new(config: VadConfig) -> Self {
        let capacity = config.slow_end_windows.max(config.fast_end_windows) + 1;
        Self {
            config,
            buffer: VecDeque::new(),
            history: VecDeque::with_capacity(capacity),
            speech_window_count: 0,
            processed_samples: 0,
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.history.clear();
        self.speech_window_count = 0;
        self.processed_samples = 0;
    }

    /// Feed a chunk of 8kHz μ-law bytes, as received off the carrier
    /// WebSocket's `media` frames.
    pub fn push_ulaw_chunk(&mut self, chunk: &[u8]) -> VadUpdate {
        let pcm = crate::audio::decode(chunk);
        self.push_pcm_chunk(&pcm)
    }

    /// Feed a chunk of already-decoded PCM samples.
    pub fn push_pcm_chunk(&mut self, pcm: &[i16]) -> VadUpdate {
        self.buffer.extend(pcm.iter().copied());
        self.processed_samples += pcm.len() as u64;

        let window = self.config.window_samples().max(1);
        let overlap = self.config.overlap_samples().min(window.saturating_sub(1));

        let mut any_speech_this_chunk = false;
        while self.buffer.len() >= window {
            let slice: Vec<i16> = self.buffer.iter().take(window).copied().collect();
            let power = mean_abs_amplitude(&slice);
            let is_speech = power > self.config.volume_threshold;
            if is_speech {
                any_speech_this_chunk = true;
                self.speech_window_count += 1;
            }
            self.push_history(!is_speech);

            let advance = window - overlap;
            for _ in 0..advance {
                self.buffer.pop_front();
            }
        }

        VadUpdate {
            is_speech: any_speech_this_chunk,
            fast_end: self.all_silent_in_last(self.config.fast_end_windows),
            slow_end: self.all_silent_in_last(self.config.slow_end_windows),
        }
    }

    fn push_history(&mut self, is_silent: bool) {
        self.history.push_back(is_silent);
        let max_len = self.config.slow_end_windows.max(self.config.fast_end_windows);
        while self.history.len() > max_len {
            self.history.pop_front();
        }
    }

    fn all_silent_in_last(&self, n: usize) -> bool {
        if self.history.len() < n || n == 0 {
            return false;
        }
        self.history.iter().rev().take(n).all(|&silent| silent)
    }

    pub fn speech_window_count(&self) -> u64 {
        self.speech_window_count
    }

    pub fn processed_samples(&self) -> u64 {
        self.processed_samples
    }
}
