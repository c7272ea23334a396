//! liveserve - a watch-rebuild-and-refresh development server for
//! static sites.

mod bus;
mod cli;
mod config;
mod logger;
mod protocol;
mod rebuild;
mod server;
mod session;
mod watch;

use anyhow::Result;
use bus::{Notification, NotificationBus};
use clap::{ColorChoice, Parser};
use cli::Cli;
use config::SiteConfig;
use rebuild::{RebuildWorker, Rebuilder, publish_outcome};
use server::ContentServer;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::thread;
use watch::{EventRoute, EventRouter, FsWatcher, collect_targets};

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    server::setup_shutdown_handler()?;

    let cli = Cli::parse();
    logger::set_verbose(cli.verbose);

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    let config = SiteConfig::load(&cli)?;
    run(&cli, &config)
}

fn run(cli: &Cli, config: &SiteConfig) -> Result<()> {
    let rebuilder = Rebuilder::new(config.build_argv()?);
    let bus = NotificationBus::new();

    // Build once up-front so the served output is current. A failing
    // initial build is not fatal; the browser shows the diagnostics and
    // the next source change retries.
    log!("rebuild"; "running initial build");
    match rebuilder.rebuild() {
        Ok(outcome) => publish_outcome(&outcome, &bus),
        Err(e) => {
            log!("error"; "{e:#}");
            bus.publish(Notification::Error(format!("{e:#}")));
        }
    }

    let targets = collect_targets(config);
    let watcher = FsWatcher::start(&targets)?;
    let events = watcher.events();

    let worker = RebuildWorker::spawn(rebuilder, bus.clone());
    let trigger = worker.trigger_handle();

    let server = ContentServer::bind(config, bus.clone())?;
    let addr = server.addr();
    log!("serve"; "serving HTTP on {} port {} (http://{}/)", addr.ip(), addr.port(), display_addr(addr));
    server::register_shutdown(server.shutdown_handle());

    // Dispatcher: routes raw filesystem events to the rebuild worker or
    // the notification bus. Ends when the watcher's channel closes.
    let router = EventRouter::new(config.build.output.clone(), config.config_path.clone());
    let dispatcher = thread::spawn(move || {
        for event in events.iter() {
            match router.route(&event) {
                EventRoute::Rebuild(path) => {
                    log!("watch"; "source changed: {} ({:?})", path.display(), event.kind);
                    trigger.trigger(path);
                }
                EventRoute::Refresh(path) => {
                    debug!("watch"; "output changed: {}", path);
                    bus.publish(Notification::Refresh(path));
                }
                EventRoute::Ignore => {}
            }
        }
    });

    if cli.browser {
        open_browser(addr);
    }

    server.run()?;

    // Teardown: stop the watcher first so the dispatcher's channel
    // drains and closes, then let any in-flight build finish.
    watcher.stop(&targets);
    dispatcher
        .join()
        .map_err(|_| anyhow::anyhow!("watch dispatcher panicked"))?;
    worker.shutdown();
    log!("serve"; "bye");
    Ok(())
}

fn display_addr(addr: SocketAddr) -> SocketAddr {
    // An unspecified bind address is not connectable; show loopback.
    match addr.ip() {
        ip if ip.is_unspecified() && ip.is_ipv4() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        ip if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

fn open_browser(addr: SocketAddr) {
    let url = format!("http://{}/", display_addr(addr));
    log!("serve"; "opening {}", url);
    if let Err(e) = webbrowser::open(&url) {
        log!("error"; "failed to open browser: {}", e);
    }
}
