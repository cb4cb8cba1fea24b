//! The canonical game-loop frame: eight busy-loop jobs wired into the
//! standard dependency graph.
//!
//! ```text
//! input ─► physics ─► collision ─► animation ─┐
//!                               ─► particles ─┼─► rendering
//!                  ─► game_elements ──────────┘
//! sound (independent)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use charcoal::Job;

/// Spins until `us` microseconds of wall time have elapsed, standing in for
/// a fixed amount of frame work.
pub fn busy_wait(us: u64) {
    let start = Instant::now();
    let duration = Duration::from_micros(us);
    while start.elapsed() < duration {}
}

/// Builds one frame's worth of jobs, dependants first, and returns them in
/// the canonical submission order.
pub fn build_frame() -> Vec<Arc<Job>> {
    let rendering = Job::new("rendering", || busy_wait(2000));
    let animation = Job::with_dependants("animation", || busy_wait(600), &[rendering.clone()]);
    let particles = Job::with_dependants("particles", || busy_wait(800), &[rendering.clone()]);
    let game_elements =
        Job::with_dependants("game_elements", || busy_wait(2400), &[rendering.clone()]);
    let collision = Job::with_dependants(
        "collision",
        || busy_wait(1200),
        &[animation.clone(), particles.clone()],
    );
    let physics = Job::with_dependants(
        "physics",
        || busy_wait(1000),
        &[collision.clone(), game_elements.clone()],
    );
    let input = Job::with_dependants("input", || busy_wait(200), &[physics.clone()]);
    let sound = Job::new("sound", || busy_wait(1000));

    vec![
        input,
        physics,
        collision,
        animation,
        particles,
        game_elements,
        rendering,
        sound,
    ]
}

/// The serial fallback: the same eight updates, run in dependency order on
/// the calling thread.
pub fn update_serial() {
    busy_wait(200); // input
    busy_wait(1000); // physics
    busy_wait(1200); // collision
    busy_wait(600); // animation
    busy_wait(800); // particles
    busy_wait(2400); // game elements
    busy_wait(2000); // rendering
    busy_wait(1000); // sound
}
