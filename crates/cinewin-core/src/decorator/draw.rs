//! Software drawing into ARGB8888 shared-memory buffers.
//!
//! Coordinates passed to [`Canvas`] are logical; every shape is scaled by
//! the buffer scale before it is written. Pixels are stored little-endian
//! as `wl_shm` expects.

use thiserror::Error;

use super::layout::{
    visible_border, ButtonKind, SurfaceIndex, BUTTON_INNER_SEPARATION,
};
use crate::geometry::{Point, Rect, Size};

pub const TRANSPARENT: u32 = 0x0000_0000;
pub const BORDER_COLOR: u32 = 0xFF00_0000;
pub const BUTTON_COLOR_ACTIVE: u32 = 0xFFFF_FFFF;
pub const BUTTON_COLOR_INACTIVE: u32 = 0xFF77_7777;
pub const BUTTON_HOVER_COLOR: u32 = 0xFF55_5555;

pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("{rect} lies outside the {size} canvas")]
    OutOfBounds { rect: Rect, size: Size },

    #[error("buffer of {len} bytes cannot hold {size} pixels at scale {scale}")]
    BufferTooSmall { len: usize, size: Size, scale: i32 },

    #[error("invalid buffer scale {0}")]
    InvalidScale(i32),
}

/// Bytes needed for a `size` (logical) buffer at `scale`.
pub fn buffer_len(size: Size, scale: i32) -> usize {
    (size * scale).area() * BYTES_PER_PIXEL
}

/// A scaled view onto a pixel buffer.
pub struct Canvas<'a> {
    data: &'a mut [u8],
    size: Size,
    scale: i32,
}

impl<'a> Canvas<'a> {
    pub fn new(data: &'a mut [u8], size: Size, scale: i32) -> Result<Self, DrawError> {
        if scale < 1 {
            return Err(DrawError::InvalidScale(scale));
        }
        let needed = buffer_len(size, scale);
        if data.len() < needed {
            return Err(DrawError::BufferTooSmall {
                len: data.len(),
                size,
                scale,
            });
        }
        Ok(Self {
            data: &mut data[..needed],
            size,
            scale,
        })
    }

    /// Logical size.
    pub const fn size(&self) -> Size {
        self.size
    }

    pub const fn scale(&self) -> i32 {
        self.scale
    }

    /// Color of the pixel at buffer (not logical) coordinates.
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        let stride = self.size.width * self.scale;
        if x < 0 || y < 0 || x >= stride || y >= self.size.height * self.scale {
            return None;
        }
        let offset = (y * stride + x) as usize * BYTES_PER_PIXEL;
        let bytes: [u8; 4] = self.data[offset..offset + BYTES_PER_PIXEL].try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    pub fn fill(&mut self, color: u32) {
        let bytes = color.to_le_bytes();
        for pixel in self.data.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel.copy_from_slice(&bytes);
        }
    }

    pub fn fill_rect(&mut self, color: u32, rect: Rect) -> Result<(), DrawError> {
        if !Rect::from_parts(Point::ORIGIN, self.size).encloses(rect) {
            return Err(DrawError::OutOfBounds {
                rect,
                size: self.size,
            });
        }
        let bytes = color.to_le_bytes();
        let stride = (self.size.width * self.scale) as usize;
        let x0 = (rect.x() * self.scale) as usize;
        let x1 = (rect.right() * self.scale) as usize;
        for y in rect.y() * self.scale..rect.bottom() * self.scale {
            let row = y as usize * stride;
            let span = &mut self.data[(row + x0) * BYTES_PER_PIXEL..(row + x1) * BYTES_PER_PIXEL];
            for pixel in span.chunks_exact_mut(BYTES_PER_PIXEL) {
                pixel.copy_from_slice(&bytes);
            }
        }
        Ok(())
    }

    pub fn horizontal_line(&mut self, color: u32, from: Point, length: i32) -> Result<(), DrawError> {
        self.fill_rect(color, Rect::new(from.x, from.y, length, 1))
    }

    pub fn vertical_line(&mut self, color: u32, from: Point, length: i32) -> Result<(), DrawError> {
        self.fill_rect(color, Rect::new(from.x, from.y, 1, length))
    }

    /// Diagonal line going down one row per step and `stride` columns per
    /// step.
    pub fn line_with_stride(
        &mut self,
        color: u32,
        from: Point,
        stride: i32,
        length: i32,
    ) -> Result<(), DrawError> {
        for step in 0..length {
            self.fill_rect(color, Rect::new(from.x + step * stride, from.y + step, 1, 1))?;
        }
        Ok(())
    }

    pub fn outline_rect(&mut self, color: u32, rect: Rect, top_thickness: i32) -> Result<(), DrawError> {
        for row in 0..top_thickness {
            self.horizontal_line(color, Point::new(rect.x(), rect.y() + row), rect.width())?;
        }
        self.horizontal_line(color, Point::new(rect.x(), rect.bottom() - 1), rect.width())?;
        self.vertical_line(color, rect.origin, rect.height())?;
        self.vertical_line(color, Point::new(rect.right() - 1, rect.y()), rect.height())
    }
}

/// Clear a border surface and paint its visible part.
pub fn paint_border(canvas: &mut Canvas<'_>, index: SurfaceIndex) -> Result<(), DrawError> {
    canvas.fill(TRANSPARENT);
    let visible = visible_border(index, canvas.size());
    if visible.width() > 0 && visible.height() > 0 {
        canvas.fill_rect(BORDER_COLOR, visible)?;
    }
    Ok(())
}

/// Paint one title bar button. `restore` draws the maximize button as
/// "restore" (two stacked windows).
pub fn paint_button(
    canvas: &mut Canvas<'_>,
    kind: ButtonKind,
    rect: Rect,
    color: u32,
    hovered: bool,
    restore: bool,
) -> Result<(), DrawError> {
    if hovered {
        canvas.fill_rect(BUTTON_HOVER_COLOR, rect)?;
    }
    let inner = rect.inset(BUTTON_INNER_SEPARATION);
    match kind {
        ButtonKind::Minimize => canvas.horizontal_line(
            color,
            Point::new(inner.x(), inner.bottom() - 2),
            inner.width(),
        )?,
        ButtonKind::Maximize if restore => {
            let offset = inner.width() / 4;
            let back = Rect::new(inner.x() + offset, inner.y(), inner.width() - offset, inner.height() - offset);
            let front = Rect::new(inner.x(), inner.y() + offset, inner.width() - offset, inner.height() - offset);
            canvas.outline_rect(color, back, 1)?;
            canvas.fill_rect(BORDER_COLOR, front.inset(1))?;
            canvas.outline_rect(color, front, 2)?;
        }
        ButtonKind::Maximize => canvas.outline_rect(color, inner, 2)?,
        ButtonKind::Close => {
            canvas.line_with_stride(color, inner.origin, 1, inner.width())?;
            canvas.line_with_stride(color, Point::new(inner.right() - 1, inner.y()), -1, inner.width())?;
        }
    }
    Ok(())
}
