// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod commands;
mod config;
mod editor;
mod errors;
mod fetchers;
mod separator;
mod server;
mod transcode;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tauri::menu::{Menu, MenuItem};
use tauri::tray::TrayIconBuilder;
use tauri::Manager;
use tokio::sync::Mutex;

#[derive(Parser)]
#[command(name = "soniflow")]
#[command(about = "Local audio workstation: editing, stem separation, video fetching", long_about = None)]
#[command(version)]
struct Args {
    /// Load the UI from a dev server instead of the bundled files
    #[arg(long)]
    dev_url: Option<String>,

    /// Port for the local media file server
    #[arg(long, default_value_t = 5000)]
    media_port: u16,

    /// Port for the bundled UI server
    #[arg(long, default_value_t = 8000)]
    ui_port: u16,
}

/// Bundled resources live next to the executable in a packaged install and
/// in the working directory during development.
fn resource_path(relative: &str) -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let bundled = dir.join(relative);
            if bundled.exists() {
                return bundled;
            }
        }
    }
    PathBuf::from(relative)
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("soniflow")
}

fn build_main_window(app: &tauri::AppHandle, url: &str) -> errors::Result<()> {
    let external = url::Url::parse(url)
        .map_err(|e| errors::AppError::Unsupported(format!("bad window url {}: {}", url, e)))?;

    tauri::WebviewWindowBuilder::new(app, "main", tauri::WebviewUrl::External(external))
        .title("Soniflow")
        .inner_size(1280.0, 820.0)
        .min_inner_size(960.0, 640.0)
        .build()?;
    Ok(())
}

fn setup_tray(app: &tauri::AppHandle, window_url: String) -> tauri::Result<()> {
    let open = MenuItem::with_id(app, "open", "Open", true, None::<&str>)?;
    let exit = MenuItem::with_id(app, "exit", "Exit", true, None::<&str>)?;
    let menu = Menu::with_items(app, &[&open, &exit])?;

    let mut tray = TrayIconBuilder::with_id("main-tray")
        .menu(&menu)
        .show_menu_on_left_click(true)
        .tooltip("Soniflow")
        .on_menu_event(move |app, event| match event.id.as_ref() {
            "open" => {
                if let Some(window) = app.get_webview_window("main") {
                    let _ = window.show();
                    let _ = window.set_focus();
                } else if let Err(e) = build_main_window(app, &window_url) {
                    error!("Failed to reopen main window: {}", e);
                }
            }
            "exit" => app.exit(0),
            _ => {}
        });

    if let Some(icon) = app.default_window_icon() {
        tray = tray.icon(icon.clone());
    }
    tray.build(app)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logger
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    info!("Starting Soniflow");

    // Load settings
    let settings = match config::SettingsStore::load() {
        Ok(store) => {
            info!("Settings loaded successfully");
            store
        }
        Err(e) => {
            error!("Failed to locate the settings directory: {}", e);
            config::SettingsStore::load_from(PathBuf::from("settings.json"))
        }
    };

    // Proxy settings flow to child tools through the environment
    if let Some(proxy) = settings.get_str("proxy").filter(|p| !p.is_empty()) {
        info!("Setting up proxy: {}", proxy);
        std::env::set_var("HTTP_PROXY", &proxy);
        std::env::set_var("HTTPS_PROXY", &proxy);
        std::env::set_var("ALL_PROXY", &proxy);
    }

    let data_root = data_root();
    let uploads_dir = data_root.join("uploads");
    let temp_audio_dir = data_root.join("temp_audio");
    let output_dir = settings.output_dir();
    for dir in [&uploads_dir, &temp_audio_dir, &output_dir] {
        if let Err(e) = utils::ensure_dir_exists(dir).await {
            error!("Failed to create {:?}: {}", dir, e);
        }
    }

    // Local servers: media files for the player, static files for the UI
    let media_dirs = Arc::new(server::MediaDirs {
        roots: vec![uploads_dir.clone(), temp_audio_dir.clone()],
    });
    server::start_media_server_background(args.media_port, media_dirs);

    let ui_dist = Arc::new(server::UiDist {
        root: resource_path("ui/dist"),
    });
    server::start_ui_server_background(args.ui_port, ui_dist);

    let window_url = args
        .dev_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}", args.ui_port));

    let session = fetchers::BiliSession::from_settings(&settings);
    let bili = match fetchers::bilibili::BiliClient::new(session) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build the bilibili client: {}", e);
            std::process::exit(1);
        }
    };

    // Create app state
    let app_state = commands::AppState {
        settings: Arc::new(Mutex::new(settings)),
        editor: Arc::new(Mutex::new(editor::AudioEditor::new())),
        separator: Arc::new(separator::StemSeparator::new(resource_path(
            "worker/separator_worker.py",
        ))),
        bili,
        thumbnails: fetchers::thumbnail_cache(),
        previews: fetchers::preview_cache(),
        uploads_dir,
        temp_audio_dir,
        media_base: format!("http://127.0.0.1:{}", args.media_port),
    };

    let setup_url = window_url.clone();
    let app = tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .manage(app_state)
        .invoke_handler(tauri::generate_handler![
            commands::get_settings,
            commands::save_app_settings,
            commands::get_cwd,
            commands::list_directory,
            commands::upload_file_stream,
            commands::save_recorded_audio,
            commands::get_audio_url,
            commands::get_local_file_url,
            commands::get_current_audio_url,
            commands::load_audio,
            commands::export_audio,
            commands::undo_audio,
            commands::redo_audio,
            commands::copy_audio_selection,
            commands::paste_audio_selection,
            commands::get_audio_history_state,
            commands::process_and_export_audio,
            commands::generate_waveform,
            commands::form_transformation,
            commands::process_audio,
            commands::search_videos,
            commands::get_video_preview,
            commands::download_video,
            commands::download_youtube_video,
            commands::check_if_playlist,
            commands::download_playlist,
            commands::whether_collection,
            commands::get_collection_videos,
            commands::get_image_proxy,
            commands::open_save_file_dialog
        ])
        .setup(move |app| {
            setup_tray(app.handle(), setup_url.clone())?;
            build_main_window(app.handle(), &setup_url)?;
            info!("Application setup completed");
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(|_app, event| {
        // Closing the last window asks for an exit with no code; the tray
        // keeps the process alive until an explicit Exit.
        if let tauri::RunEvent::ExitRequested { api, code, .. } = event {
            if code.is_none() {
                api.prevent_exit();
            }
        }
    });
}
