//! Fixed color tags for racer slots. Never rendered by this crate -- a
//! transport adapter consumes these to color-code players by slot index.

pub const RACER_COLORS: [&str; 5] = ["#00ff00", "#ff5600", "#0000ff", "#ffff00", "#ff00ff"];
