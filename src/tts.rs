//! Cache-first speech synthesis and carrier playback queue (spec.md §4.8).
//!
//! Ported from `examples/original_source/src/bridge/tts_bridge.py`'s
//! `VoiceVoxTTSBridge`/`GetTemplateAudio`: every NLG utterance carries a TTS
//! cache label (from `templates/dialogue.json`'s `prompts`/`correction`
//! tuples), and synthesis first checks a directory of pre-rendered WAV
//! files for that label before falling back to a live vendor call. Audio
//! handed to the carrier is always 8kHz μ-law, matching
//! `trans4twilio`/`set_frame_rate(8000)` in the original.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::HanasuError;

/// How many distinct free-text utterances (FAQ answers, corrections) to
/// keep vendor-synthesized audio for, so a repeated question within a call
/// doesn't pay for another vendor round-trip.
const LIVE_SYNTHESIS_CACHE_CAPACITY: usize = 64;

/// One synthesized utterance ready for the carrier: μ-law bytes plus the
/// text it was synthesized from (kept for conversation logging).
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub text: String,
    pub ulaw: Vec<u8>,
}

/// Vendor contract for turning text the cache doesn't have into audio.
#[async_trait]
pub trait TtsVendor: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>, HanasuError>;
}

/// Loads template WAVs from disk, keyed by their TTS cache label
/// (`DATE_1`, `INITIAL`, `FILLER`, ...).
pub struct TemplateAudioCache {
    dir: PathBuf,
    loaded: HashMap<String, Vec<i16>>,
}

impl TemplateAudioCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, loaded: HashMap::new() }
    }

    /// Load (and memoize) the PCM samples for `label` from `<dir>/<label>.wav`.
    pub fn get(&mut self, label: &str) -> Option<&[i16]> {
        if !self.loaded.contains_key(label) {
            match self.load_from_disk(label) {
                Ok(samples) => {
                    self.loaded.insert(label.to_string(), samples);
                }
                Err(e) => {
                    warn!(label, error = %e, "template audio not cached, falling back to live synthesis");
                    return None;
                }
            }
        }
        self.loaded.get(label).map(Vec::as_slice)
    }

    fn load_from_disk(&self, label: &str) -> anyhow::Result<Vec<i16>> {
        let path = self.dir.join(format!("{}.wav", label));
        read_wav_as_pcm(&path)
    }
}

fn read_wav_as_pcm(path: &Path) -> anyhow::Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples: Result<Vec<i16>, _> = match spec.sample_format {
        hound::SampleFormat::Int => reader.samples::<i16>().collect(),
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0) as i16))
            .collect(),
    };
    Ok(samples?)
}

/// Bounded producer/consumer queue between synthesis and the carrier
/// writer. Capacity is set from [`crate::config::TtsConfig::queue_capacity`];
/// a full queue means the carrier is falling behind, and `try_send` surfaces
/// that as a [`HanasuError::TtsWrite`] rather than growing unbounded.
pub struct TtsQueue {
    tx: mpsc::Sender<SynthesizedAudio>,
    rx: mpsc::Receiver<SynthesizedAudio>,
}

impl TtsQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx }
    }

    pub fn sender(&self) -> mpsc::Sender<SynthesizedAudio> {
        self.tx.clone()
    }

    pub async fn recv(&mut self) -> Option<SynthesizedAudio> {
        self.rx.recv().await
    }
}

/// Cache-first TTS bridge: checks [`TemplateAudioCache`] for `label`, falls
/// back to `vendor.synthesize(text)` on a miss.
pub struct TtsBridge<V: TtsVendor> {
    cache: TemplateAudioCache,
    live_cache: LruCache<String, Vec<i16>>,
    vendor: V,
}

impl<V: TtsVendor> TtsBridge<V> {
    pub fn new(cache_dir: PathBuf, vendor: V) -> Self {
        Self {
            cache: TemplateAudioCache::new(cache_dir),
            live_cache: LruCache::new(NonZeroUsize::new(LIVE_SYNTHESIS_CACHE_CAPACITY).unwrap()),
            vendor,
        }
    }

    /// Synthesize `text` (cache label `label`, if this utterance has one)
    /// to 8kHz μ-law bytes.
    pub async fn synthesize(&mut self, text: &str, label: Option<&str>) -> Result<SynthesizedAudio, HanasuError> {
        if let Some(label) = label {
            if let Some(pcm) = self.cache.get(label) {
                info!(label, "served TTS from template cache");
                return Ok(SynthesizedAudio { text: text.to_string(), ulaw: crate::audio::encode(pcm) });
            }
        }

        if let Some(pcm) = self.live_cache.get(text) {
            info!("served TTS from live synthesis cache");
            return Ok(SynthesizedAudio { text: text.to_string(), ulaw: crate::audio::encode(pcm) });
        }

        let pcm = self.vendor.synthesize(text).await.map_err(|e| {
            warn!(error = %e, "TTS synthesis failed");
            HanasuError::TtsSynth(e.to_string())
        })?;
        self.live_cache.put(text.to_string(), pcm.clone());
        Ok(SynthesizedAudio { text: text.to_string(), ulaw: crate::audio::encode(&pcm) })
    }
}

/// Placeholder [`TtsVendor`] used until a real synthesis vendor is wired
/// in; always fails, so callers fall through to whatever the template
/// cache already has and surface [`HanasuError::TtsSynth`] on a true miss.
#[derive(Debug, Default)]
pub struct NullTtsVendor;

#[async_trait]
impl TtsVendor for NullTtsVendor {
    async fn synthesize(&self, _text: &str) -> Result<Vec<i16>, HanasuError> {
        Err(HanasuError::TtsSynth("no TTS vendor configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeVendor;

    #[async_trait]
    impl TtsVendor for FakeVendor {
        async fn synthesize(&self, _text: &str) -> Result<Vec<i16>, HanasuError> {
            Ok(vec![1000; 160])
        }
    }

    #[tokio::test]
    async fn cache_miss_falls_back_to_vendor_synthesis() {
        let mut bridge = TtsBridge::new(PathBuf::from("/nonexistent/dir"), FakeVendor);
        let result = bridge.synthesize("こんにちは", Some("UNKNOWN_LABEL")).await.unwrap();
        assert!(!result.ulaw.is_empty());
        assert_eq!(result.text, "こんにちは");
    }

    #[tokio::test]
    async fn repeated_unlabeled_text_is_served_from_live_cache() {
        struct CountingVendor {
            calls: std::sync::atomic::AtomicU32,
        }
        #[async_trait]
        impl TtsVendor for CountingVendor {
            async fn synthesize(&self, _text: &str) -> Result<Vec<i16>, HanasuError> {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![42; 160])
            }
        }

        let vendor = CountingVendor { calls: std::sync::atomic::AtomicU32::new(0) };
        let mut bridge = TtsBridge::new(PathBuf::from("/nonexistent/dir"), vendor);

        bridge.synthesize("同じ質問です", None).await.unwrap();
        bridge.synthesize("同じ質問です", None).await.unwrap();

        assert_eq!(bridge.vendor.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_label_always_uses_vendor() {
        let mut bridge = TtsBridge::new(PathBuf::from("/nonexistent/dir"), FakeVendor);
        let result = bridge.synthesize("自由文", None).await.unwrap();
        assert!(!result.ulaw.is_empty());
    }

    #[tokio::test]
    async fn queue_delivers_in_fifo_order() {
        let mut queue = TtsQueue::new(4);
        let tx = queue.sender();
        tx.send(SynthesizedAudio { text: "one".into(), ulaw: vec![1] }).await.unwrap();
        tx.send(SynthesizedAudio { text: "two".into(), ulaw: vec![2] }).await.unwrap();

        let first = queue.recv().await.unwrap();
        let second = queue.recv().await.unwrap();
        assert_eq!(first.text, "one");
        assert_eq!(second.text, "two");
    }

    #[test]
    fn template_cache_returns_none_for_missing_file() {
        let mut cache = TemplateAudioCache::new(PathBuf::from("/nonexistent/dir"));
        assert!(cache.get("DATE_1").is_none());
    }
}
