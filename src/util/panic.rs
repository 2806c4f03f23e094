//! Process-wide panic logging
//!
//! Connection tasks run on the runtime's workers; a panic there unwinds
//! into the task's `JoinHandle` and the listener keeps running. The hook
//! routes the panic message through `tracing` first.

use std::sync::Once;

use tracing::error;

static INSTALL: Once = Once::new();

/// Install the hook once; later calls are no-ops
pub fn install_panic_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            error!(panic = %info, "Task panicked");
            previous(info);
        }));
    });
}
