//! Fatal-error reporting.
//!
//! The heap has no way to recover from running dry or from a broken boot
//! precondition, so those paths end here. The kernel installs a handler that
//! prints to its console and halts; until it does, the default handler
//! panics, which a freestanding panic handler turns into a halt as well.

use spin::Once;

/// Never returns. Receives the optional human-readable reason.
pub type FatalHandler = fn(Option<&str>) -> !;

static HANDLER: Once<FatalHandler> = Once::new();

/// Installs the handler used by [`fatal`].
///
/// Only the first call has any effect. Returns `false` if a handler was
/// already in place.
pub fn install(handler: FatalHandler) -> bool {
  let mut installed = false;

  HANDLER.call_once(|| {
    installed = true;
    handler
  });

  installed
}

/// Reports an unrecoverable condition and stops.
pub fn fatal(message: Option<&str>) -> ! {
  log::error!("fatal: {}", message.unwrap_or("unspecified error"));

  match HANDLER.get() {
    Some(handler) => handler(message),
    None => default_handler(message),
  }
}

fn default_handler(message: Option<&str>) -> ! {
  panic!("kernel fatal error: {}", message.unwrap_or("unspecified error"));
}
