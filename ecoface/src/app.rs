use ecoface_core::{
    default_camera_backend, default_clip_player, CaptureSession, CaptureState, ClipPlayer,
    EcofaceConfig, Error, FrameExtractor, Identity, MediaCapture, ProfileManager,
    RecognitionClient, StillImage,
};
use log::{debug, info};

use crate::input::Input;
use crate::notify;
use crate::profile_view::{self, ProfileExit};
use crate::{Mode, Options};

enum Next {
    Profile(Identity),
    Quit,
}

pub struct App {
    config: EcofaceConfig,
    options: Options,
    session: CaptureSession,
    client: RecognitionClient,
    extractor: FrameExtractor,
    player: Option<Box<dyn ClipPlayer>>,
    /// Still shown for the current capture; for clips this is the extracted frame.
    preview: Option<StillImage>,
    input: Input,
}

impl App {
    pub fn new(config: EcofaceConfig, options: Options) -> Self {
        let backend = default_camera_backend(&config.camera);
        let mut session = CaptureSession::new(backend, &config.camera);
        if let Some(facing) = options.facing {
            session.set_facing(facing);
        }
        let client = RecognitionClient::new(&config);
        let extractor = FrameExtractor::new(&config.extraction);
        let player = default_clip_player(&config.camera);

        Self {
            config,
            options,
            session,
            client,
            extractor,
            player,
            preview: None,
            input: Input::spawn(),
        }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        let result = self.main_loop();
        self.session.stop();
        result
    }

    fn main_loop(&mut self) -> anyhow::Result<()> {
        loop {
            let identity = match self.capture_screen() {
                Next::Profile(identity) => identity,
                Next::Quit => return Ok(()),
            };

            let mut manager = ProfileManager::new(self.client.transport(), identity);
            match profile_view::run(&mut manager, &self.input) {
                ProfileExit::Back => {
                    info!("Returned to capture screen");
                    self.options.mode = Mode::Verify;
                }
                ProfileExit::Quit => return Ok(()),
            }
        }
    }

    fn capture_screen(&mut self) -> Next {
        let kind = if self.options.video { "video" } else { "photo" };
        let purpose = match self.options.mode {
            Mode::Verify => "verification",
            Mode::Register => "registration",
        };
        println!("\n== Face {} ({}) ==", purpose, kind);
        self.start_camera();

        loop {
            let line = match self.session.state() {
                CaptureState::Idle => self.input.prompt("[Enter] start camera  [f] flip  [q] quit"),
                CaptureState::Active => {
                    self.report_lighting();
                    self.input.prompt("[Enter] capture  [f] flip  [s] stop  [q] quit")
                }
                CaptureState::Captured => {
                    let default = match self.options.mode {
                        Mode::Verify => "validate",
                        Mode::Register => "register",
                    };
                    self.input.prompt(&format!(
                        "[v] validate  [r] register  [t] retake  [q] quit (Enter = {})",
                        default
                    ))
                }
                other => {
                    debug!("Unexpected state {:?} at prompt", other);
                    self.session.stop();
                    continue;
                }
            };
            let Some(line) = line else { return Next::Quit };

            match (self.session.state(), line.as_str()) {
                (_, "q") => return Next::Quit,
                (CaptureState::Idle, "") => self.start_camera(),
                (CaptureState::Idle, "f") | (CaptureState::Active, "f") => {
                    if let Err(e) = self.session.flip() {
                        notify::error(e);
                    }
                }
                (CaptureState::Active, "") => self.capture(),
                (CaptureState::Active, "s") => {
                    self.session.stop();
                    notify::success("Camera stopped");
                }
                (CaptureState::Captured, "t") => self.retake(),
                (CaptureState::Captured, "v") => {
                    if let Some(identity) = self.validate() {
                        return Next::Profile(identity);
                    }
                }
                (CaptureState::Captured, "r") => {
                    if let Some(identity) = self.register() {
                        return Next::Profile(identity);
                    }
                }
                (CaptureState::Captured, "") => {
                    let outcome = match self.options.mode {
                        Mode::Verify => self.validate(),
                        Mode::Register => self.register(),
                    };
                    if let Some(identity) = outcome {
                        return Next::Profile(identity);
                    }
                }
                (_, other) => notify::warning(format!("Unknown command '{}'", other)),
            }
        }
    }

    fn start_camera(&mut self) {
        match self.session.start() {
            Ok(()) => {
                if let Some(desc) = self.session.stream_description() {
                    notify::success(format!("Camera ready: {}", desc));
                }
            }
            Err(e @ Error::PermissionDenied(_)) => {
                notify::error(format!("{}. Check that your user may open the video device.", e));
            }
            Err(e) => notify::error(e),
        }
    }

    fn report_lighting(&mut self) {
        match self.session.preview() {
            Ok(frame) => {
                let brightness = frame.mean_brightness();
                debug!("Preview {}x{} brightness {:.1}", frame.width, frame.height, brightness);
                if brightness < self.config.camera.min_brightness {
                    notify::warning(format!(
                        "Lighting is low ({:.0}), face the light if you can",
                        brightness
                    ));
                }
            }
            Err(e) => debug!("No preview frame: {}", e),
        }
    }

    fn capture(&mut self) {
        self.preview = None;

        if !self.options.video {
            match self.session.capture_still() {
                Ok(MediaCapture::Still(still)) => {
                    notify::success(format!("Photo taken ({}x{})", still.width, still.height));
                    self.preview = Some(still.clone());
                }
                Ok(_) => {}
                Err(e) => notify::error(e),
            }
            return;
        }

        println!(
            "Recording {:.1}s clip, enter 's' to stop early...",
            self.config.camera.clip_duration_secs
        );
        self.input.arm(self.session.stop_handle());
        let clip = match self.session.capture_clip() {
            Ok(MediaCapture::Clip(clip)) => Some(clip.clone()),
            Ok(_) => None,
            Err(e) => {
                notify::error(e);
                None
            }
        };
        self.input.disarm();

        let Some(clip) = clip else { return };
        notify::success(format!(
            "Clip recorded ({} KiB, {})",
            clip.size() / 1024,
            clip.mime_type
        ));

        match self.player.as_deref_mut() {
            Some(player) => match self.extractor.extract_blocking(player, &clip) {
                Ok(still) => {
                    println!("Preview frame: {}x{}", still.width, still.height);
                    self.preview = Some(still);
                }
                Err(e) => notify::warning(e),
            },
            None => debug!("No clip player in this build, skipping preview"),
        }
    }

    fn retake(&mut self) {
        self.preview = None;
        if let Err(e) = self.session.retake() {
            notify::error(e);
        }
    }

    fn validate(&mut self) -> Option<Identity> {
        let media = self.session.captured()?;
        match self.client.verify(media) {
            Ok(identity) => {
                let level = identity.access_level.label();
                notify::success(format!("Welcome, {} ({})", identity.name, level));
                self.session.take_capture();
                self.preview = None;
                Some(identity)
            }
            Err(e) if e.discards_capture() => {
                notify::error(format!("{}. Please try again.", e));
                self.retake();
                None
            }
            Err(e) => {
                notify::error(e);
                None
            }
        }
    }

    fn register(&mut self) -> Option<Identity> {
        let image = match (&self.preview, self.session.captured()) {
            (Some(still), _) => still.clone(),
            (None, Some(MediaCapture::Still(still))) => still.clone(),
            _ => {
                notify::error(Error::FrameExtractionFailed("no still image to register".into()));
                return None;
            }
        };

        let name = match self.options.name.clone() {
            Some(name) => name,
            None => self.input.prompt("Name:")?,
        };
        let level = match self.options.level {
            Some(level) => level,
            None => {
                let answer = self
                    .input
                    .prompt("Access level (1 basic, 2 restricted, 3 minister):")?;
                match answer.parse::<i64>() {
                    Ok(level) => level,
                    Err(_) => {
                        let msg = format!("'{}' is not an access level", answer);
                        notify::error(Error::ValidationError(msg));
                        return None;
                    }
                }
            }
        };

        match self.client.register(&name, level, &image) {
            Ok(identity) => {
                let level = identity.access_level.label();
                notify::success(format!("Registered {} ({})", identity.name, level));
                self.session.take_capture();
                self.preview = None;
                Some(identity)
            }
            Err(e) => {
                notify::error(e);
                None
            }
        }
    }
}
