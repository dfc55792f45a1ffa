use clap::Parser;
use funksync::config::{Settings, MAX_SPEED, MIN_SPEED};
use funksync::core::audio::{decode_file, AudioBackend, CpalBackend, NullBackend};
use funksync::core::clock::{Clock, ManualClock, SystemClock};
use funksync::core::context::EngineContext;
use funksync::core::input::{KeyboardState, Player};
use funksync::core::loading::{load_song, SongRequest};
use funksync::core::time::MusicTime;
use funksync::game::judgment::Tally;
use funksync::game::render::NullRenderer;
use funksync::game::song::Difficulty;
use funksync::screens::{practice, ScreenAction};
use log::{error, info, warn, LevelFilter};
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

/// Plays a chart through the practice engine with bot play on both sides.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Chart JSON. Repeat for several difficulties (`song-easy.json`, `song.json`, `song-hard.json`).
    #[arg(long = "chart", required = true)]
    charts: Vec<PathBuf>,
    /// Instrumental track (.ogg or .mp3).
    #[arg(long)]
    inst: PathBuf,
    /// Voices track, played in lock-step with the instrumental.
    #[arg(long)]
    voices: Option<PathBuf>,
    /// One-shot sound played on each player hit.
    #[arg(long)]
    hit_sound: Option<PathBuf>,
    #[arg(long, default_value = "settings.ini")]
    settings: PathBuf,
    #[arg(long, default_value = "normal")]
    difficulty: Difficulty,
    /// Playback speed multiplier.
    #[arg(long)]
    speed: Option<f64>,
    /// Start position in seconds.
    #[arg(long, value_name = "SECONDS")]
    start: Option<f64>,
    /// Run without an output device, as fast as the frame loop allows.
    #[arg(long)]
    mute: bool,
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .filter_module("funksync::game", LevelFilter::Debug)
        .filter_module("funksync::screens", LevelFilter::Debug)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging();
    info!("FunkSync starting...");

    let mut settings = Settings::load(&args.settings);
    settings.bot_play = true;
    settings.opponent_autoplay = true;
    let frame = Duration::from_secs_f64(1.0 / settings.target_fps as f64);

    let request = SongRequest { charts: args.charts.clone(), inst: args.inst.clone(), voices: args.voices.clone() };
    let loaded = match load_song(&request) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load song: {}", e);
            return Err(e.into());
        }
    };

    let manual_clock = Rc::new(ManualClock::new());
    let (clock, audio): (Box<dyn Clock>, Box<dyn AudioBackend>) = if args.mute {
        (Box::new(manual_clock.clone()), Box::new(NullBackend::default()))
    } else {
        match CpalBackend::new() {
            Ok(backend) => (Box::new(SystemClock), Box::new(backend)),
            Err(e) => {
                error!("Failed to open audio output: {} (try --mute)", e);
                return Err(e.into());
            }
        }
    };
    let mut ctx = EngineContext::new(settings, clock, audio);
    if let Some(path) = &args.hit_sound {
        match decode_file(path) {
            Ok(pcm) => ctx.hit_sound = Some(pcm),
            Err(e) => warn!("Hit sound '{}' unusable: {}", path.display(), e),
        }
    }

    let mut state = practice::init(&mut ctx, loaded, args.difficulty)?;
    if let Some(speed) = args.speed {
        state.tracks.set_speed(speed.clamp(MIN_SPEED, MAX_SPEED));
    }
    if let Some(start) = args.start {
        practice::seek_to(&mut state, MusicTime::from_secs_f64(start));
    }

    let keyboard = KeyboardState::new();
    let mut tally = Tally::default();
    let mut renderer = NullRenderer::default();
    let mut last_report = state.audio_pos;
    loop {
        if args.mute {
            manual_clock.advance(frame);
            state.tracks.pull_for(frame);
        } else {
            std::thread::sleep(frame);
        }

        let action = practice::update(&mut state, &mut ctx, &keyboard, &mut tally);
        renderer.clear();
        practice::draw(&state, &mut renderer, ctx.clock.now());

        if state.audio_pos >= last_report + MusicTime::from_millis(1000) {
            last_report = state.audio_pos;
            if let Some(hud) = renderer.texts.last() {
                info!("{}", hud);
            }
        }
        if let ScreenAction::Navigate(screen) = action {
            info!("Leaving practice for {:?}.", screen);
            break;
        }
    }

    let (human, opponent) = (Player::Human.index(), Player::Opponent.index());
    info!(
        "Run finished: player {} hit / {} missed, opponent {} hit / {} missed.",
        tally.hits[human], tally.misses[human], tally.hits[opponent], tally.misses[opponent]
    );
    Ok(())
}
