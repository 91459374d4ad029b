//! Closed-form decoration geometry and hit testing.
//!
//! All positions are logical (unscaled) and relative to the main surface
//! unless stated otherwise. The window geometry reported to the compositor
//! covers the visible border and title bar; the invisible resize strips
//! around it stay outside.

use crate::geometry::{Point, Rect, Size};
use crate::shell::ResizeEdge;

pub const VISIBLE_BORDER_WIDTH: i32 = 5;
pub const RESIZE_BORDER_WIDTH: i32 = 10;
pub const BORDER_WIDTH: i32 = VISIBLE_BORDER_WIDTH + RESIZE_BORDER_WIDTH;
pub const TOP_BAR_HEIGHT: i32 = 33;
pub const RESIZE_MAX_CORNER_DISTANCE: i32 = BORDER_WIDTH;
pub const BUTTONS_EDGE_DISTANCE: i32 = 6;
pub const BUTTON_INNER_SEPARATION: i32 = 4;
pub const BUTTON_SIZE: i32 = 21;

/// One of the four border surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceIndex {
    Top,
    Right,
    Bottom,
    Left,
}

impl SurfaceIndex {
    pub const ALL: [Self; 4] = [Self::Top, Self::Right, Self::Bottom, Self::Left];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonKind {
    Minimize,
    Maximize,
    Close,
}

/// What a position on a border surface means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    Button(ButtonKind),
    Resize(ResizeEdge),
    /// Draggable title bar area.
    TitleBar,
}

/// Size added around the main surface by decorations, in window geometry
/// terms (visible border on all sides plus the title bar).
pub const fn decoration_inset() -> Size {
    Size::new(
        2 * VISIBLE_BORDER_WIDTH,
        2 * VISIBLE_BORDER_WIDTH + TOP_BAR_HEIGHT,
    )
}

/// Main surface size for a window of `full_size`.
pub fn main_surface_size(full_size: Size, decorations_active: bool) -> Size {
    if decorations_active {
        full_size.saturating_sub(decoration_inset())
    } else {
        full_size
    }
}

/// Window size for a main surface of `main_size`.
pub fn full_surface_size(main_size: Size, decorations_active: bool) -> Size {
    if decorations_active {
        main_size + decoration_inset()
    } else {
        main_size
    }
}

/// Window geometry relative to the main surface.
pub const fn window_geometry(main_size: Size, decorations_active: bool) -> Rect {
    if decorations_active {
        Rect::new(
            -VISIBLE_BORDER_WIDTH,
            -(VISIBLE_BORDER_WIDTH + TOP_BAR_HEIGHT),
            main_size.width + 2 * VISIBLE_BORDER_WIDTH,
            main_size.height + 2 * VISIBLE_BORDER_WIDTH + TOP_BAR_HEIGHT,
        )
    } else {
        Rect::new(0, 0, main_size.width, main_size.height)
    }
}

/// Position and size of a border surface relative to the main surface.
pub const fn border_geometry(index: SurfaceIndex, main_size: Size) -> Rect {
    let Size { width, height } = main_size;
    match index {
        SurfaceIndex::Top => Rect::new(
            -BORDER_WIDTH,
            -(BORDER_WIDTH + TOP_BAR_HEIGHT),
            width + 2 * BORDER_WIDTH,
            BORDER_WIDTH + TOP_BAR_HEIGHT,
        ),
        SurfaceIndex::Right => Rect::new(width, 0, BORDER_WIDTH, height),
        SurfaceIndex::Bottom => Rect::new(-BORDER_WIDTH, height, width + 2 * BORDER_WIDTH, BORDER_WIDTH),
        SurfaceIndex::Left => Rect::new(-BORDER_WIDTH, 0, BORDER_WIDTH, height),
    }
}

/// Visible (painted) part of a border surface, in that surface's
/// coordinates.
pub const fn visible_border(index: SurfaceIndex, surface_size: Size) -> Rect {
    let Size { width, height } = surface_size;
    match index {
        SurfaceIndex::Top => Rect::new(
            RESIZE_BORDER_WIDTH,
            RESIZE_BORDER_WIDTH,
            width - 2 * RESIZE_BORDER_WIDTH,
            height - RESIZE_BORDER_WIDTH,
        ),
        SurfaceIndex::Right => Rect::new(0, 0, VISIBLE_BORDER_WIDTH, height),
        SurfaceIndex::Bottom => Rect::new(
            RESIZE_BORDER_WIDTH,
            0,
            width - 2 * RESIZE_BORDER_WIDTH,
            VISIBLE_BORDER_WIDTH,
        ),
        SurfaceIndex::Left => Rect::new(RESIZE_BORDER_WIDTH, 0, VISIBLE_BORDER_WIDTH, height),
    }
}

/// Buttons on the top surface, laid out right to left (close, maximize,
/// minimize). Buttons that do not fit are left out.
pub fn button_layout(top_size: Size) -> Vec<(ButtonKind, Rect)> {
    let y = BORDER_WIDTH + BUTTONS_EDGE_DISTANCE;
    let mut x = top_size.width - BORDER_WIDTH;
    let mut buttons = Vec::with_capacity(3);
    for kind in [ButtonKind::Close, ButtonKind::Maximize, ButtonKind::Minimize] {
        x -= BUTTONS_EDGE_DISTANCE + BUTTON_SIZE;
        if x < BORDER_WIDTH || y + BUTTON_SIZE > top_size.height {
            break;
        }
        buttons.push((kind, Rect::new(x, y, BUTTON_SIZE, BUTTON_SIZE)));
    }
    buttons
}

/// Resize edge for `position` on border surface `index` of `surface_size`.
/// Positions within [`RESIZE_MAX_CORNER_DISTANCE`] of a corner resize
/// diagonally. On the top surface, the title bar below the resize strip
/// maps to [`ResizeEdge::None`].
pub const fn resize_edge_for_position(
    index: SurfaceIndex,
    surface_size: Size,
    position: Point,
) -> ResizeEdge {
    let near_left = position.x <= RESIZE_MAX_CORNER_DISTANCE;
    let near_right = position.x >= surface_size.width - RESIZE_MAX_CORNER_DISTANCE;
    let near_bottom = position.y >= surface_size.height - RESIZE_MAX_CORNER_DISTANCE;
    match index {
        SurfaceIndex::Top => {
            let in_title_bar = position.y >= RESIZE_BORDER_WIDTH
                && position.x >= RESIZE_BORDER_WIDTH
                && position.x < surface_size.width - RESIZE_BORDER_WIDTH;
            if in_title_bar {
                ResizeEdge::None
            } else if near_left {
                ResizeEdge::TopLeft
            } else if near_right {
                ResizeEdge::TopRight
            } else {
                ResizeEdge::Top
            }
        }
        SurfaceIndex::Right => {
            if near_bottom {
                ResizeEdge::BottomRight
            } else {
                ResizeEdge::Right
            }
        }
        SurfaceIndex::Bottom => {
            if near_left {
                ResizeEdge::BottomLeft
            } else if near_right {
                ResizeEdge::BottomRight
            } else {
                ResizeEdge::Bottom
            }
        }
        SurfaceIndex::Left => {
            if near_bottom {
                ResizeEdge::BottomLeft
            } else {
                ResizeEdge::Left
            }
        }
    }
}

/// Full hit test: buttons first (top surface only, first match wins), then
/// resize edges, then title bar.
pub fn hit_test(
    index: SurfaceIndex,
    surface_size: Size,
    position: Point,
    buttons: &[(ButtonKind, Rect)],
) -> Hit {
    if index == SurfaceIndex::Top {
        if let Some(&(kind, _)) = buttons.iter().find(|(_, rect)| rect.contains(position)) {
            return Hit::Button(kind);
        }
    }
    match resize_edge_for_position(index, surface_size, position) {
        ResizeEdge::None => Hit::TitleBar,
        edge => Hit::Resize(edge),
    }
}
