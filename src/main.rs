//! Hook entry point.
//!
//! Exit behavior:
//!   - exit 0 with JSON `{"permissionDecision":"deny","message":...}` = block
//!   - exit 0 with no output = allow

use pretool_guardian::engine;

fn main() {
    std::process::exit(engine::run());
}
