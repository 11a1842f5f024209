//! Still-frame extraction from a recorded clip.
//!
//! The clip is loaded into an off-screen [`ClipPlayer`], seeked to just
//! before its end, and the frame there is rendered. Players do not reliably
//! report seek completion, so four triggers may attempt the render:
//! `Seeked`, `LoadedData`, `CanPlay` and a hard timeout. Each trigger
//! attempts at most once and a [`FrameLatch`] lets only the first successful
//! attempt produce output.

use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::media::{StillImage, VideoClip};

/// Notifications from an off-screen player.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Duration in seconds; `None` when the container does not declare one.
    LoadedMetadata { duration: Option<f64> },
    LoadedData,
    CanPlay,
    Seeked,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Seeked,
    LoadedData,
    CanPlay,
    Timeout,
}

/// An off-screen video player.
pub trait ClipPlayer: Send {
    /// Start loading `clip`. Events may be sent from any thread, before or
    /// after this returns.
    fn open(&mut self, clip: &VideoClip, events: async_channel::Sender<PlayerEvent>) -> Result<()>;

    fn seek(&mut self, seconds: f64);

    /// Render the frame at the current position.
    fn render_frame(&mut self) -> Result<StillImage>;

    fn close(&mut self) {}
}

/// Opens at most once.
#[derive(Debug, Default)]
pub struct FrameLatch {
    fired: AtomicBool,
}

impl FrameLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for the first caller only.
    pub fn fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

struct Attempts<'a> {
    player: &'a mut dyn ClipPlayer,
    latch: FrameLatch,
    tried: HashSet<Trigger>,
}

impl Attempts<'_> {
    fn attempt(&mut self, trigger: Trigger) -> Option<StillImage> {
        if self.latch.is_fired() || !self.tried.insert(trigger) {
            return None;
        }
        match self.player.render_frame() {
            Ok(still) if self.latch.fire() => {
                info!("Frame extracted on {:?} ({}x{})", trigger, still.width, still.height);
                Some(still)
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Frame render on {:?} failed: {}", trigger, e);
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameExtractor {
    seek_back: f64,
    timeout: Duration,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new(&ExtractionConfig::default())
    }
}

impl FrameExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            seek_back: config.seek_back_secs,
            timeout: config.timeout(),
        }
    }

    /// Where to seek for the last frame.
    pub fn seek_target(&self, duration: Option<f64>) -> f64 {
        match duration {
            Some(d) if d.is_finite() && d > 0.0 => (d - self.seek_back).max(0.0),
            _ => f64::MAX,
        }
    }

    pub async fn extract(
        &self,
        player: &mut dyn ClipPlayer,
        clip: &VideoClip,
    ) -> Result<StillImage> {
        let (tx, rx) = async_channel::unbounded();
        let detached = clip.clone();
        player
            .open(&detached, tx)
            .map_err(|e| Error::FrameExtractionFailed(format!("cannot load clip: {}", e)))?;

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut attempts = Attempts {
            player,
            latch: FrameLatch::new(),
            tried: HashSet::new(),
        };
        let mut events_open = true;
        let mut timed_out = false;

        let result = loop {
            let produced = tokio::select! {
                event = rx.recv(), if events_open => match event {
                    Ok(PlayerEvent::LoadedMetadata { duration }) => {
                        let target = self.seek_target(duration);
                        debug!("Clip duration {:?}, seeking to {}", duration, target);
                        attempts.player.seek(target);
                        None
                    }
                    Ok(PlayerEvent::Seeked) => attempts.attempt(Trigger::Seeked),
                    Ok(PlayerEvent::LoadedData) => attempts.attempt(Trigger::LoadedData),
                    Ok(PlayerEvent::CanPlay) => attempts.attempt(Trigger::CanPlay),
                    Ok(PlayerEvent::Error(msg)) => {
                        break Err(Error::FrameExtractionFailed(msg));
                    }
                    Err(_) => {
                        events_open = false;
                        None
                    }
                },
                _ = &mut deadline, if !timed_out => {
                    timed_out = true;
                    attempts.attempt(Trigger::Timeout)
                }
            };

            if let Some(still) = produced {
                break Ok(still);
            }
            if timed_out {
                warn!("No frame extracted within {:?}", self.timeout);
                break Err(Error::FrameExtractionFailed(format!(
                    "no frame could be rendered within {:?}",
                    self.timeout
                )));
            }
        };

        attempts.player.close();
        result
    }

    /// Run [`extract`](Self::extract) on a private current-thread runtime.
    pub fn extract_blocking(
        &self,
        player: &mut dyn ClipPlayer,
        clip: &VideoClip,
    ) -> Result<StillImage> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::FrameExtractionFailed(format!("runtime: {}", e)))?;
        runtime.block_on(self.extract(player, clip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        events: Vec<PlayerEvent>,
        /// Emitted in response to a seek.
        seeked_on_seek: bool,
        /// Renders fail until a seek has happened.
        needs_seek: bool,
        always_fail: bool,
    }

    struct ScriptedPlayer {
        script: Script,
        sender: Option<async_channel::Sender<PlayerEvent>>,
        position: Option<f64>,
        renders: Arc<Mutex<u32>>,
        closed: bool,
    }

    impl ScriptedPlayer {
        fn new(script: Script) -> (Self, Arc<Mutex<u32>>) {
            let renders = Arc::new(Mutex::new(0));
            let player = Self {
                script,
                sender: None,
                position: None,
                renders: renders.clone(),
                closed: false,
            };
            (player, renders)
        }
    }

    impl ClipPlayer for ScriptedPlayer {
        fn open(
            &mut self,
            _clip: &VideoClip,
            events: async_channel::Sender<PlayerEvent>,
        ) -> Result<()> {
            for event in &self.script.events {
                events.try_send(event.clone()).unwrap();
            }
            self.sender = Some(events);
            Ok(())
        }

        fn seek(&mut self, seconds: f64) {
            self.position = Some(seconds);
            if self.script.seeked_on_seek {
                if let Some(tx) = &self.sender {
                    tx.try_send(PlayerEvent::Seeked).unwrap();
                }
            }
        }

        fn render_frame(&mut self) -> Result<StillImage> {
            *self.renders.lock().unwrap() += 1;
            if self.script.always_fail || (self.script.needs_seek && self.position.is_none()) {
                return Err(Error::FrameExtractionFailed("not ready".into()));
            }
            Ok(StillImage::new(vec![0xff, 0xd8], 4, 3))
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn clip() -> VideoClip {
        VideoClip {
            data: vec![1, 2, 3],
            mime_type: "video/webm".into(),
        }
    }

    fn extractor() -> FrameExtractor {
        FrameExtractor::new(&ExtractionConfig::default())
    }

    #[test]
    fn latch_fires_once() {
        let latch = FrameLatch::new();
        assert!(!latch.is_fired());
        assert!(latch.fire());
        assert!(!latch.fire());
        assert!(latch.is_fired());
    }

    #[test]
    fn seek_target_handles_unknown_durations() {
        let ex = extractor();
        assert!((ex.seek_target(Some(3.0)) - 2.9).abs() < 1e-9);
        assert_eq!(ex.seek_target(Some(0.05)), 0.0);
        assert_eq!(ex.seek_target(Some(f64::INFINITY)), f64::MAX);
        assert_eq!(ex.seek_target(Some(f64::NAN)), f64::MAX);
        assert_eq!(ex.seek_target(None), f64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn all_triggers_yield_one_frame() {
        let (mut player, renders) = ScriptedPlayer::new(Script {
            events: vec![
                PlayerEvent::LoadedMetadata { duration: Some(3.0) },
                PlayerEvent::LoadedData,
                PlayerEvent::CanPlay,
            ],
            seeked_on_seek: true,
            ..Script::default()
        });

        let still = extractor().extract(&mut player, &clip()).await.unwrap();
        assert_eq!(still.width, 4);
        assert_eq!(*renders.lock().unwrap(), 1);
        assert!((player.position.unwrap() - 2.9).abs() < 1e-9);
        assert!(player.closed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_extracts_when_seek_never_completes() {
        let (mut player, renders) = ScriptedPlayer::new(Script {
            events: vec![PlayerEvent::LoadedMetadata { duration: None }],
            needs_seek: true,
            ..Script::default()
        });

        let still = extractor().extract(&mut player, &clip()).await;
        assert!(still.is_ok());
        assert_eq!(*renders.lock().unwrap(), 1);
        assert_eq!(player.position, Some(f64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_early_triggers_fall_through_to_seeked() {
        // LoadedData and CanPlay arrive before metadata, so they render too early.
        let (mut player, renders) = ScriptedPlayer::new(Script {
            events: vec![
                PlayerEvent::LoadedData,
                PlayerEvent::CanPlay,
                PlayerEvent::LoadedMetadata { duration: Some(2.0) },
            ],
            seeked_on_seek: true,
            needs_seek: true,
            ..Script::default()
        });

        assert!(extractor().extract(&mut player, &clip()).await.is_ok());
        assert_eq!(*renders.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_events_attempt_once_each() {
        let (mut player, renders) = ScriptedPlayer::new(Script {
            events: vec![PlayerEvent::CanPlay, PlayerEvent::CanPlay, PlayerEvent::CanPlay],
            always_fail: true,
            ..Script::default()
        });

        let err = extractor().extract(&mut player, &clip()).await.unwrap_err();
        assert!(matches!(err, Error::FrameExtractionFailed(_)));
        // One CanPlay attempt plus the timeout attempt.
        assert_eq!(*renders.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn player_error_fails_extraction() {
        let (mut player, _) = ScriptedPlayer::new(Script {
            events: vec![PlayerEvent::Error("decode error".into())],
            ..Script::default()
        });
        let err = extractor().extract(&mut player, &clip()).await.unwrap_err();
        assert!(matches!(err, Error::FrameExtractionFailed(msg) if msg == "decode error"));
        assert!(player.closed);
    }

    #[test]
    fn blocking_wrapper_runs_extraction() {
        let (mut player, _) = ScriptedPlayer::new(Script {
            events: vec![PlayerEvent::LoadedMetadata { duration: Some(1.0) }],
            seeked_on_seek: true,
            ..Script::default()
        });
        assert!(extractor().extract_blocking(&mut player, &clip()).is_ok());
    }
}
