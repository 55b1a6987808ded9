use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use tape_lights::config;
use tape_lights::control::{Dispatcher, EventSink};
use tape_lights::error::AppError;
use tape_lights::model::effect::Effect;
use tape_lights::model::manager::SceneManager;
use tape_lights::model::scene::Scene;
use tape_lights::model::segment::Segment;
use tape_lights::net::{self, NullEventSink, UdpEventClient};
use tape_lights::output::{BinaryEmitter, EmitterConfig};
use tape_lights::persist;
use tape_lights::state::AppState;

#[derive(Parser)]
#[command(name = "tape_lights", about = "LED tape light signal engine", version)]
struct Args {
    /// Frames per second
    #[arg(long, default_value_t = config::DEFAULT_FPS)]
    fps: f64,

    /// Number of LEDs on the strip
    #[arg(long = "led-count", default_value_t = config::DEFAULT_LED_COUNT)]
    led_count: usize,

    /// Address the control server listens on
    #[arg(long = "osc-ip", default_value = config::DEFAULT_OSC_IP)]
    osc_ip: String,

    /// Port the control server listens on
    #[arg(long = "osc-port", default_value_t = config::IN_PORT)]
    osc_port: u16,

    /// Port confirmation/event messages are sent back to
    #[arg(long = "out-port", default_value_t = config::OUT_PORT)]
    out_port: u16,

    /// Destination host for binary pixel frames
    #[arg(long = "binary-ip", default_value = config::LED_BINARY_OUT_IP)]
    binary_ip: String,

    /// Destination port for binary pixel frames
    #[arg(long = "binary-port", default_value_t = config::LED_BINARY_OUT_PORT)]
    binary_port: u16,

    /// Accepted for launcher compatibility; this build is always headless
    #[arg(long = "no-gui")]
    no_gui: bool,

    /// Run the render loop only, without the control server
    #[arg(long = "simulator-only")]
    simulator_only: bool,

    /// Load initial state from a JSON file (manager or scene document)
    #[arg(long = "config-file")]
    config_file: Option<PathBuf>,

    /// Accepted for launcher compatibility; no effect without a GUI
    #[arg(long = "scale-factor", default_value_t = 1.2)]
    scale_factor: f64,
}

/// The out-of-the-box light show: three effects of three staggered,
/// alternating-direction segments each.
fn default_segments(effect: &mut Effect, led_count: usize, count: u32) {
    #[allow(clippy::cast_precision_loss)]
    let center = (led_count / 2) as f64;
    for i in 1..=count {
        let idx = i32::try_from(i).unwrap_or(0);
        let mut segment = Segment::with_defaults(i, led_count);
        segment.color = [idx % 6, (idx + 1) % 6, (idx + 2) % 6, (idx + 3) % 6];
        segment.move_speed = if i % 2 == 0 {
            config::DEFAULT_MOVE_SPEED
        } else {
            -config::DEFAULT_MOVE_SPEED
        };
        segment.initial_position = center - 30.0 + f64::from(i) * 30.0;
        segment.current_position = segment.initial_position;
        effect.add_segment(segment);
    }
}

fn default_manager(led_count: usize, fps: f64) -> SceneManager {
    let mut scene = Scene::new(1);
    for effect_id in 1..=3 {
        let mut effect = Effect::new(effect_id, led_count, fps);
        default_segments(&mut effect, led_count, 3);
        scene.add_effect(effect);
    }
    let mut manager = SceneManager::new();
    manager.add_scene(scene);
    manager
}

/// Build the starting model: a config file if given (manager document
/// first, then a bare scene document), otherwise the default show.
fn initial_manager(args: &Args) -> SceneManager {
    if let Some(path) = &args.config_file {
        let mut manager = SceneManager::new();
        if persist::load_manager_into(&mut manager, path).is_ok() {
            return manager;
        }
        match persist::load_scene(path) {
            Ok(scene) => {
                let mut manager = SceneManager::new();
                manager.add_scene(scene);
                return manager;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file unusable, using defaults");
            }
        }
    }
    default_manager(args.led_count, args.fps)
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(
        fps = args.fps,
        led_count = args.led_count,
        listen = %format!("{}:{}", args.osc_ip, args.osc_port),
        "initializing signal engine"
    );
    if args.no_gui {
        info!("--no-gui accepted; this build is always headless");
    }
    if (args.scale_factor - 1.2).abs() > f64::EPSILON {
        info!(
            scale_factor = args.scale_factor,
            "--scale-factor has no effect without a GUI"
        );
    }

    let emitter = Arc::new(BinaryEmitter::new(EmitterConfig {
        ip: args.binary_ip.clone(),
        port: args.binary_port,
        interval: 1.0 / args.fps.max(1.0),
        ..EmitterConfig::default()
    })?);
    info!(
        destination = %format!("{}:{}", args.binary_ip, args.binary_port),
        "binary frame output configured"
    );

    let mut manager = initial_manager(&args);
    manager.set_sink(emitter.clone());

    let state = Arc::new(AppState::new(
        manager,
        emitter,
        Dispatcher::new(args.led_count, args.fps),
    ));

    if args.simulator_only {
        info!("running without a control server (--simulator-only)");
    } else {
        // Fatal at startup if the receive socket cannot bind.
        let socket =
            tokio::net::UdpSocket::bind((args.osc_ip.as_str(), args.osc_port)).await?;
        let events: Arc<dyn EventSink> = match UdpEventClient::new("127.0.0.1", args.out_port) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!(error = %e, "event client unavailable, replies disabled");
                Arc::new(NullEventSink)
            }
        };
        info!(port = args.osc_port, reply_port = args.out_port, "control server started");
        tokio::spawn(net::run_control_server(state.clone(), events, socket));
    }

    let render_state = state.clone();
    let render = tokio::spawn(async move {
        loop {
            let tick = render_state.with_manager_mut(|manager| {
                manager.update();
                manager.tick_seconds()
            });
            tokio::time::sleep(Duration::from_secs_f64(tick)).await;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    render.abort();
    Ok(())
}
