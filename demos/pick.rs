//! Follow the pointer for a few seconds and print the color under it.
//!
//! xcap cannot report the pointer, so this walks a synthetic cursor across
//! the primary display instead.
//!
//! ```text
//! RUST_LOG=debug cargo run --example pick --features xcap
//! ```

use std::time::Duration;

use snow_picker::{CaptureEngine, Point};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let engine = CaptureEngine::builder().target_fps(30).build()?;
    let displays = engine.registry().refresh()?;
    let primary = displays
        .primary()
        .or_else(|| displays.displays().first())
        .ok_or_else(|| anyhow::anyhow!("no display found"))?;
    println!("{} display(s), primary {primary}", displays.displays().len());

    let bounds = primary.bounds();
    let y = bounds.y + bounds.height / 2.0;
    engine.cursor_moved(Point::new(bounds.x + 1.0, y))?;
    engine.start_preview()?;

    for step in 0..20u32 {
        let x = bounds.x + bounds.width * f64::from(step) / 20.0;
        engine.cursor_moved(Point::new(x, y))?;
        std::thread::sleep(Duration::from_millis(150));
        let c = engine.current_sampled_color();
        println!("({x:>7.1}, {y:>7.1}) -> #{:02x}{:02x}{:02x}", c.r, c.g, c.b);
    }

    engine.stop_preview()?;
    let stats = engine.stats();
    println!(
        "{} previews delivered, {} stale frames dropped, {} restarts",
        stats.frames_delivered, stats.stale_frames, stats.restarts
    );

    let still = engine.capture_once(Point::new(bounds.x + 10.0, bounds.y + 10.0))?;
    let path = std::env::temp_dir().join("snow-picker-corner.png");
    image::RgbaImage::from_raw(still.size(), still.size(), still.into_frame().into_rgba_bytes())
        .ok_or_else(|| anyhow::anyhow!("preview buffer size mismatch"))?
        .save(&path)?;
    println!("corner preview written to {}", path.display());
    Ok(())
}
