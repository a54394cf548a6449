//! A9 — signal wiring: a `signal-hook` SIGINT/SIGTERM handler that calls
//! [`AsyncProvider::stop`], so Ctrl-C/`kill` drain workers the same way a
//! protocol-level shutdown would.

use std::io;

use log::info;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::provider::AsyncProvider;

/// Spawns a background thread watching SIGINT/SIGTERM; on either, calls
/// `provider.stop()` once and exits.
pub fn install_shutdown_handler(provider: AsyncProvider) -> io::Result<std::thread::JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::Builder::new()
        .name("nanoserve-signal".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("received signal {sig}, stopping async provider");
                provider.stop();
            }
        })
}
