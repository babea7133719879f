//! grefsen - Wayland compositor shell
//!
//! Main entry point; everything else lives in grefsen-app.

fn main() {
    grefsen_app::run()
}
