//! Text rendered as a mesh of axis aligned quads.
//!
//! Glyphs come from a built-in 5x7 bitmap font. Every horizontal run of lit pixels
//! becomes one quad, one unit per pixel. Text space has its origin at the top left
//! of the first line and y pointing down, like screen space. Lowercase letters are
//! drawn as uppercase, characters without a glyph leave a gap.

use crate::{
    data_structures::{
        mesh::{Indices, Mesh, SharedMesh},
        scene_graph::NodeId,
    },
    device::{Category, DeviceRef, IndexFormat},
};

const GLYPH_WIDTH: usize = 5;
const GLYPH_HEIGHT: usize = 7;
/// Horizontal distance between the origins of two glyphs.
pub const ADVANCE: usize = GLYPH_WIDTH + 1;
/// Vertical distance between two lines.
pub const LINE_HEIGHT: usize = GLYPH_HEIGHT + 1;
/// Quads addressable with 16-bit indices.
const MAX_QUADS: usize = (u16::MAX as usize + 1) / 4;

/// Rows top to bottom, bit 4 is the leftmost column.
fn glyph(c: char) -> Option<[u8; GLYPH_HEIGHT]> {
    let rows = match c.to_ascii_uppercase() {
        ' ' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '"' => [0x0A, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '\'' => [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '+' => [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '=' => [0x00, 0x00, 0x1F, 0x00, 0x1F, 0x00, 0x00],
        '?' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
        'A' => [0x0E, 0x11, 0x11, 0x11, 0x1F, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        _ => return None,
    };
    Some(rows)
}

/// Width and height of `text` in text-space units.
pub fn text_size(text: &str) -> (f32, f32) {
    let lines: Vec<&str> = text.split('\n').collect();
    let columns = lines.iter().map(|line| line.chars().count()).max().unwrap_or(0);
    let width = (columns * ADVANCE).saturating_sub(1);
    let height = if text.is_empty() {
        0
    } else {
        lines.len() * LINE_HEIGHT - 1
    };
    (width as f32, height as f32)
}

/// One `[x, y, w, h]` rectangle per run of lit pixels.
fn layout(text: &str, origin_x: f32, origin_y: f32) -> Vec<[f32; 4]> {
    let mut quads = Vec::new();
    for (line_index, line) in text.split('\n').enumerate() {
        let top = origin_y + (line_index * LINE_HEIGHT) as f32;
        for (column, c) in line.chars().enumerate() {
            let Some(rows) = glyph(c) else {
                continue;
            };
            let left = origin_x + (column * ADVANCE) as f32;
            for (row, bits) in rows.iter().enumerate() {
                let mut x = 0;
                while x < GLYPH_WIDTH {
                    if bits & (0x10 >> x) == 0 {
                        x += 1;
                        continue;
                    }
                    let start = x;
                    while x < GLYPH_WIDTH && bits & (0x10 >> x) != 0 {
                        x += 1;
                    }
                    quads.push([left + start as f32, top + row as f32, (x - start) as f32, 1.0]);
                }
            }
        }
    }
    quads
}

/// A string turned into a dynamic mesh.
///
/// Attach a [`RenderableComponent`](super::RenderableComponent) sharing
/// [`mesh`](Self::mesh) to draw it.
#[derive(Debug)]
pub struct TextComponent {
    pub(crate) node: Option<NodeId>,
    mesh: SharedMesh,
    text: String,
}

impl TextComponent {
    pub fn new(device: &DeviceRef) -> Self {
        Self {
            node: None,
            mesh: Mesh::new(device, Category::Dynamic, IndexFormat::U16).into_shared(),
            text: String::new(),
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn mesh(&self) -> &SharedMesh {
        &self.mesh
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Rebuilds the mesh for `text`.
    ///
    /// The alignment factors shift the text by a fraction of its size: `0` keeps
    /// the origin at the left/top edge, `0.5` centers, `1` aligns right/bottom.
    pub fn set_text(&mut self, text: &str, horizontal_alignment: f32, vertical_alignment: f32) {
        let (width, height) = text_size(text);
        let mut quads = layout(text, -width * horizontal_alignment, -height * vertical_alignment);
        if quads.len() > MAX_QUADS {
            log::warn!(
                "Text needs {} quads, only the first {} fit 16-bit indices",
                quads.len(),
                MAX_QUADS
            );
            quads.truncate(MAX_QUADS);
        }

        let mut vertices = Vec::with_capacity(quads.len() * 4);
        for [x, y, w, h] in quads.iter().copied() {
            vertices.push([x, y, 0.0]);
            vertices.push([x + w, y, 0.0]);
            vertices.push([x + w, y + h, 0.0]);
            vertices.push([x, y + h, 0.0]);
        }
        let indices: Vec<u16> = (0..quads.len() as u32)
            .flat_map(|quad| [0, 1, 2, 0, 2, 3].map(|corner| (4 * quad + corner) as u16))
            .collect();

        self.mesh.borrow_mut().update_mesh(
            Some(&vertices),
            None,
            vertices.len(),
            Some(Indices::U16(&indices)),
        );
        self.text = text.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;

    #[test]
    fn size_of_multiline_text() {
        assert_eq!(text_size(""), (0.0, 0.0));
        assert_eq!(text_size("A"), (5.0, 7.0));
        assert_eq!(text_size("AB\nC"), (11.0, 15.0));
    }

    #[test]
    fn runs_merge_into_single_quads() {
        // Top row of 'T' is five lit pixels, the stem one pixel on six rows.
        let quads = layout("T", 0.0, 0.0);
        assert_eq!(quads.len(), 7);
        assert_eq!(quads[0], [0.0, 0.0, 5.0, 1.0]);
        assert_eq!(quads[1], [2.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn lowercase_uses_uppercase_glyphs() {
        assert_eq!(layout("hi", 0.0, 0.0), layout("HI", 0.0, 0.0));
        assert!(layout("~", 0.0, 0.0).is_empty());
    }

    #[test]
    fn mesh_has_four_vertices_and_six_indices_per_quad() {
        let device = HeadlessDevice::shared();
        let mut text = TextComponent::new(&device);
        text.set_text("T", 0.0, 0.0);
        let mesh = text.mesh().borrow();
        assert_eq!(mesh.vertex_count(), 28);
        assert_eq!(mesh.index_count(), 42);
        assert!(mesh.uses_indexed_rendering());
        assert_eq!(text.text(), "T");
    }

    #[test]
    fn clearing_text_empties_the_mesh() {
        let device = HeadlessDevice::shared();
        let mut text = TextComponent::new(&device);
        text.set_text("T", 0.0, 0.0);
        text.set_text("", 0.0, 0.0);
        let mesh = text.mesh().borrow();
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.index_count(), 0);
        assert!(!mesh.uses_indexed_rendering());
    }

    #[test]
    fn alignment_shifts_origin() {
        let centered = layout("I", -5.0 * 0.5, -7.0);
        let plain = layout("I", 0.0, 0.0);
        assert_eq!(centered[0][0], plain[0][0] - 2.5);
        assert_eq!(centered[0][1], plain[0][1] - 7.0);
    }
}
