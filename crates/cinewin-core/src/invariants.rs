//! Invariant validation for the window size state.
//!
//! Checked after every applied size change in debug builds.

use crate::decorator::layout::main_surface_size;
use crate::geometry::Size;
use crate::shell::MIN_WINDOW_SIZE;
use crate::win_system::Sizes;

/// Error indicating which invariant was violated.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("Buffer scale {0} is not positive")]
    NonPositiveScale(i32),

    #[error("Buffer size {buffer} is not surface size {surface} times scale {scale}")]
    BufferSizeMismatch { buffer: Size, surface: Size, scale: i32 },

    #[error("Configured size {0} is below the minimum window size")]
    BelowMinimumSize(Size),

    #[error("Surface size {surface} does not match configured size {configured}")]
    DecorationMismatch { surface: Size, configured: Size },
}

/// Validate the size invariants. Returns the first violation found.
pub fn validate(sizes: &Sizes, decorations_active: bool) -> Result<(), InvariantError> {
    // 1. Scale is at least 1
    if sizes.scale < 1 {
        return Err(InvariantError::NonPositiveScale(sizes.scale));
    }

    // 2. Buffer is the surface in pixels
    if sizes.buffer_size != sizes.surface_size * sizes.scale {
        return Err(InvariantError::BufferSizeMismatch {
            buffer: sizes.buffer_size,
            surface: sizes.surface_size,
            scale: sizes.scale,
        });
    }

    // 3. The window is never smaller than the minimum
    if sizes.configured_size.width < MIN_WINDOW_SIZE.width
        || sizes.configured_size.height < MIN_WINDOW_SIZE.height
    {
        return Err(InvariantError::BelowMinimumSize(sizes.configured_size));
    }

    // 4. Main surface plus decorations make up the window
    if main_surface_size(sizes.configured_size, decorations_active) != sizes.surface_size {
        return Err(InvariantError::DecorationMismatch {
            surface: sizes.surface_size,
            configured: sizes.configured_size,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorator::layout::decoration_inset;
    use crate::win_system::calculate_sizes;
    use proptest::prelude::*;

    #[test]
    fn test_detects_buffer_mismatch() {
        let sizes = Sizes {
            surface_size: Size::new(800, 600),
            buffer_size: Size::new(800, 600),
            configured_size: Size::new(800, 600),
            scale: 2,
        };
        assert!(matches!(
            validate(&sizes, false),
            Err(InvariantError::BufferSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_detects_missing_decoration_inset() {
        let sizes = Sizes {
            surface_size: Size::new(800, 600),
            buffer_size: Size::new(800, 600),
            configured_size: Size::new(800, 600),
            scale: 1,
        };
        assert_eq!(
            validate(&sizes, true),
            Err(InvariantError::DecorationMismatch {
                surface: Size::new(800, 600),
                configured: Size::new(800, 600),
            })
        );
    }

    proptest! {
        #[test]
        fn calculated_sizes_hold_invariants(
            width in 0i32..8000,
            height in 0i32..5000,
            scale in 1i32..4,
            includes_decoration: bool,
            decorations_active: bool,
        ) {
            let sizes = calculate_sizes(
                Size::new(width, height),
                scale,
                includes_decoration,
                decorations_active,
            );
            prop_assert_eq!(validate(&sizes, decorations_active), Ok(()));
        }

        #[test]
        fn full_and_main_sizes_round_trip(
            width in 300i32..8000,
            height in 200i32..5000,
            scale in 1i32..4,
        ) {
            let main = Size::new(width, height);
            let from_main = calculate_sizes(main, scale, false, true);
            prop_assert_eq!(from_main.surface_size, main);
            prop_assert_eq!(from_main.configured_size, main + decoration_inset());

            let from_full = calculate_sizes(from_main.configured_size, scale, true, true);
            prop_assert_eq!(from_full, from_main);
        }
    }
}
