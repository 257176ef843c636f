use xian_store::Position;

use crate::client::Vec3;

/// Substitute the target player into a command template.
pub fn render_command(template: &str, target: &str) -> String {
  template.replace("{target}", target)
}

pub fn round_position(pos: Vec3) -> Position {
  Position {
    x: pos.x.round() as i64,
    y: pos.y.round() as i64,
    z: pos.z.round() as i64,
  }
}

pub fn distance(a: Vec3, b: Vec3) -> f64 {
  let (dx, dy, dz) = (a.x - b.x, a.y - b.y, a.z - b.z);
  (dx * dx + dy * dy + dz * dz).sqrt()
}

/// First `max` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
  match text.char_indices().nth(max) {
    Some((idx, _)) => &text[..idx],
    None => text,
  }
}
