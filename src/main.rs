use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Parser};
use log::{info, warn};
use roqtune_covers::config::{default_config_path, load_config_file};
use roqtune_covers::image_pipeline::save_png_atomic;
use roqtune_covers::{AlbumKey, CoverEvent, CoverManager, CoversConfig};
use tokio::sync::broadcast;

/// Resolve, clear or reject album cover art.
#[derive(Parser, Debug)]
#[command(name = "roqtune-covers")]
#[command(group(ArgGroup::new("action").args(["clear", "clear_all", "reject"])))]
struct Cli {
    /// Config file to read instead of the default `covers.toml`
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Use the priority network pool
    #[arg(long, default_value_t = false)]
    priority: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Forget everything known about the album and delete its cached cover
    #[arg(long)]
    clear: bool,

    /// Delete every cached cover and all cover state
    #[arg(long)]
    clear_all: bool,

    /// Blacklist the location the album's cover was last fetched from
    #[arg(long)]
    reject: bool,

    #[arg(value_name = "ARTIST", required_unless_present = "clear_all")]
    artist: Option<String>,

    #[arg(value_name = "ALBUM", required_unless_present = "clear_all")]
    album: Option<String>,

    /// Album directory, relative to the music root
    #[arg(value_name = "DIR")]
    dir: Option<String>,
}

impl Cli {
    fn album_key(&self) -> Option<AlbumKey> {
        match (self.artist.as_deref(), self.album.as_deref()) {
            (Some(artist), Some(album)) => Some(AlbumKey::new(artist, album)),
            _ => None,
        }
    }
}

fn output_path(key: &AlbumKey) -> PathBuf {
    let name = format!("{} - {}.png", key.artist(), key.album());
    PathBuf::from(name.replace(['/', '\\'], "_"))
}

fn run_lookup(manager: &CoverManager, config: &CoversConfig, args: &Cli, key: AlbumKey) {
    let (bus_sender, mut bus_receiver) = broadcast::channel(16);
    manager.submit(
        key.clone(),
        config.sizing(),
        args.priority,
        args.dir.clone(),
        Arc::new(bus_sender),
    );

    loop {
        match bus_receiver.blocking_recv() {
            Ok(CoverEvent::Started(_)) => info!("Not cached, asking network providers for {}", key),
            Ok(CoverEvent::Found { images, .. }) => {
                let path = output_path(&key);
                match save_png_atomic(&images.primary, &path) {
                    Ok(()) => println!(
                        "{}: {}x{} cover saved to {}",
                        key,
                        images.primary.width(),
                        images.primary.height(),
                        path.display()
                    ),
                    Err(err) => warn!("Cannot write cover for {}: {}", key, err),
                }
                break;
            }
            Ok(CoverEvent::NotFound(_)) => {
                println!("{}: no cover found", key);
                break;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Cover event bus lagged by {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = match args.config.clone().or_else(default_config_path) {
        Some(path) => load_config_file(&path),
        None => {
            warn!("No config directory available, using default cover settings");
            CoversConfig::default()
        }
    };

    let mut manager = CoverManager::open(config.manager_parts())?;
    if args.clear_all {
        manager.clear_all();
    } else if let Some(key) = args.album_key() {
        if args.clear {
            manager.clear(&key);
        } else if args.reject {
            manager.mark_rejected(&key);
        } else {
            run_lookup(&manager, &config, &args, key);
        }
    }

    manager.close();
    Ok(())
}
